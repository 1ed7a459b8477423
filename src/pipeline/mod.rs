pub mod extraction;
pub mod matching;
pub mod classify;
pub mod supervisor;
pub mod grading;
pub mod language;
pub mod requirements;
pub mod evaluation;
