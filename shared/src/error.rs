//! Closed error taxonomy of the recognition pipeline and the transport error
//! type raised by the upstream client.
//!
//! Clients only ever see an [`ErrorCode`] plus its catalog entry; raw
//! upstream or parse errors stay in the server-side logs.

use std::collections::HashMap;

use serde::Serialize;
use strum_macros::Display;
use thiserror::Error;

/// Every way a recognition request can fail, as exposed to API consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UnsupportedImageFormat,
    InvalidImage,
    ImageTooLarge,
    GateError,
    UnsupportedContent,
    LowConfidence,
    EmptyResult,
    UpstreamError,
    UpstreamTimeout,
    RateLimit,
}

/// User-facing description of one error code. Static data, assembled once at
/// startup into an [`ErrorCatalog`].
#[derive(Debug, Clone)]
pub struct ErrorDescriptor {
    pub http_status: u16,
    pub user_title: &'static str,
    pub user_message: &'static str,
    pub user_actions: &'static [&'static str],
    pub allow_retry: bool,
}

const FALLBACK: ErrorDescriptor = ErrorDescriptor {
    http_status: 502,
    user_title: "Service unavailable",
    user_message: "The analysis service failed unexpectedly. Please try again.",
    user_actions: &["Try again in a moment"],
    allow_retry: true,
};

/// Read-only lookup table ErrorCode -> descriptor. Built once at process
/// start and injected where responses are assembled.
#[derive(Debug, Clone)]
pub struct ErrorCatalog {
    entries: HashMap<ErrorCode, ErrorDescriptor>,
}

impl ErrorCatalog {
    pub fn new() -> Self {
        use ErrorCode::*;
        let mut entries = HashMap::new();
        entries.insert(
            UnsupportedImageFormat,
            ErrorDescriptor {
                http_status: 400,
                user_title: "Unsupported image format",
                user_message: "Only JPEG and PNG photos can be analyzed.",
                user_actions: &["Upload the photo as JPEG or PNG"],
                allow_retry: false,
            },
        );
        entries.insert(
            InvalidImage,
            ErrorDescriptor {
                http_status: 400,
                user_title: "Image could not be read",
                user_message: "The uploaded file is empty or not a readable image.",
                user_actions: &["Take the photo again and re-upload it"],
                allow_retry: false,
            },
        );
        entries.insert(
            ImageTooLarge,
            ErrorDescriptor {
                http_status: 413,
                user_title: "Image too large",
                user_message: "The photo exceeds the maximum allowed upload size.",
                user_actions: &["Resize or re-shoot the photo at a lower resolution"],
                allow_retry: false,
            },
        );
        entries.insert(
            GateError,
            ErrorDescriptor {
                http_status: 502,
                user_title: "Analysis temporarily unavailable",
                user_message: "The food check could not be completed. This is usually transient.",
                user_actions: &["Try again in a moment"],
                allow_retry: true,
            },
        );
        entries.insert(
            UnsupportedContent,
            ErrorDescriptor {
                http_status: 400,
                user_title: "No food detected",
                user_message: "The photo does not appear to contain food or drinks.",
                user_actions: &[
                    "Take a photo of the dish itself",
                    "Make sure the food is clearly visible",
                ],
                allow_retry: false,
            },
        );
        entries.insert(
            LowConfidence,
            ErrorDescriptor {
                http_status: 422,
                user_title: "Could not identify the food",
                user_message:
                    "The photo might contain food, but nothing could be recognized reliably.",
                user_actions: &[
                    "Re-shoot with better lighting",
                    "Add a short comment describing the dish",
                ],
                allow_retry: true,
            },
        );
        entries.insert(
            EmptyResult,
            ErrorDescriptor {
                http_status: 422,
                user_title: "Nothing recognized",
                user_message: "Food was detected but no items could be identified.",
                user_actions: &[
                    "Add a comment naming the dish or ingredients",
                    "Try a closer photo",
                ],
                allow_retry: true,
            },
        );
        entries.insert(
            UpstreamError,
            ErrorDescriptor {
                http_status: 502,
                user_title: "Analysis failed",
                user_message: "The analysis service returned an error. Please try again.",
                user_actions: &["Try again in a moment"],
                allow_retry: true,
            },
        );
        entries.insert(
            UpstreamTimeout,
            ErrorDescriptor {
                http_status: 504,
                user_title: "Analysis timed out",
                user_message: "The analysis took too long to complete.",
                user_actions: &["Try again in a moment"],
                allow_retry: true,
            },
        );
        entries.insert(
            RateLimit,
            ErrorDescriptor {
                http_status: 429,
                user_title: "Too many requests",
                user_message: "The analysis service is busy right now.",
                user_actions: &["Wait a little and try again"],
                allow_retry: true,
            },
        );
        Self { entries }
    }

    pub fn describe(&self, code: ErrorCode) -> &ErrorDescriptor {
        self.entries.get(&code).unwrap_or(&FALLBACK)
    }
}

impl Default for ErrorCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Failure of one upstream call, after retries were exhausted.
///
/// `Status` carries the final HTTP status so callers can classify it;
/// `Payload` covers structurally invalid 200-responses (missing choices,
/// uncoercible recognition JSON), which are an upstream fault all the same.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream request timed out: {0}")]
    Timeout(String),
    #[error("upstream network error: {0}")]
    Network(String),
    #[error("invalid upstream payload: {0}")]
    Payload(String),
}

impl UpstreamError {
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::Status { status: 429, .. } => true,
            Self::Status { body, .. } => {
                let lower = body.to_lowercase();
                lower.contains("rate limit") || lower.contains("rate-limit")
            }
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Network(msg) => msg.to_lowercase().contains("timed out"),
            _ => false,
        }
    }
}
