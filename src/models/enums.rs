use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid value for {field}: {value}")]
pub struct InvalidEnum {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnum;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(DocumentKind {
    Transcript => "transcript",
    LanguageCertificate => "language_certificate",
    DegreeCertificate => "degree_certificate",
    PreCheckDocumentation => "vpd",
    Other => "other",
});

// bwl is German-taught (German certificates expected), ai is English-taught.
str_enum!(ProgramTrack {
    Bwl => "bwl",
    Ai => "ai",
});

str_enum!(ScaleDirection {
    Ascending => "ascending",
    Descending => "descending",
});

str_enum!(ExtractionMethod {
    OcrColumn => "ocr_column",
    OcrLine => "ocr_line",
    Skipped => "ocr_skipped",
    RasterizeFailed => "FAILED_RASTERIZE",
    FailedTimeout => "FAILED_TIMEOUT",
    FailedError => "FAILED_ERROR",
});

impl ExtractionMethod {
    /// Whether the extraction terminated without producing sums.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::RasterizeFailed | Self::FailedTimeout | Self::FailedError
        )
    }
}

str_enum!(GradeCheckReason {
    Ok => "OK",
    NoClaimedGrade => "NoClaimedGrade",
    NoScaleOrInvalidForeign => "NoScaleOrInvalidForeign",
    BavarianMismatch => "BavarianMismatch",
});
