//! # Error Handling
//!
//! Typed errors for the capture core, with classification traits the caller
//! can use to decide whether to retry, recover, or give up.
//!
//! ## Error Taxonomy
//!
//! | Variant | Meaning | Caller response |
//! |---------|---------|-----------------|
//! | `Allocation` | A slot buffer could not be sized | Retry with back-off, or reduce buffers |
//! | `Timeout` | No new frame within the deadline | Retry |
//! | `UnsupportedFormat` | The converter rejected the output format | Pick another format |
//! | `StreamEnded` | End-of-stream reached (sticky) | Construct a new engine |
//! | `PipelineState` | The pipeline refused a state transition | Call `open()` again |
//! | `Config` | Invalid configuration | Fix the configuration |
//! | `GStreamer` | Launch/element failure in the GStreamer adapter | Fix the launch description |
//! | `TaskAborted` | A blocking capture task was cancelled | Give up, the runtime is shutting down |
//!
//! None of these abort the process; every failure is returned to the
//! immediate caller.
//!
//! ## Usage
//!
//! ```rust
//! use stream_capture::error::{CaptureError, Retryable};
//!
//! let error = CaptureError::timeout("capture", 1000)
//!     .with_context("waiting for the first decoded frame");
//!
//! if error.is_retryable() {
//!     // call capture() again
//! }
//! ```

use std::{collections::HashMap, time::SystemTime};

use cap_color::ImageFormat;
use thiserror::Error;

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
}

/// Metadata about when and where an error occurred
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// When the error occurred
    pub timestamp: SystemTime,
    /// The operation being performed when the error occurred
    pub operation: Option<String>,
    /// Additional context about the error
    pub context: Option<String>,
    /// Suggested recovery action
    pub recovery_suggestion: Option<String>,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub recoverable: bool,
    /// Additional metadata as key-value pairs
    pub metadata: HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            operation: None,
            context: None,
            recovery_suggestion: None,
            severity: ErrorSeverity::Error,
            retryable: false,
            recoverable: false,
            metadata: HashMap::new(),
        }
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Error type for the capture core
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Slot buffer allocation failed
    #[error("Allocation failed for {resource}: {reason}")]
    Allocation {
        resource: String,
        reason: String,
        context: ErrorContext,
    },
    /// No frame arrived before the deadline
    #[error("Timeout during {operation} after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },
    /// The converter rejected the requested output format
    #[error("Unsupported output format {requested} for {source_format} input")]
    UnsupportedFormat {
        requested: ImageFormat,
        source_format: ImageFormat,
        supported: Vec<ImageFormat>,
        context: ErrorContext,
    },
    /// End-of-stream has been reached; the stream cannot be reopened
    #[error("End of stream reached, the stream has been closed")]
    StreamEnded { context: ErrorContext },
    /// The decode pipeline failed a state transition
    #[error("Pipeline failed to transition to {target}: {reason}")]
    PipelineState {
        target: String,
        reason: String,
        context: ErrorContext,
    },
    /// Configuration validation errors
    #[error("Configuration error in '{field}': {reason} (value: {value})")]
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// A blocking capture task was cancelled before completing
    #[error("Task {task} did not complete: {reason}")]
    TaskAborted {
        task: String,
        reason: String,
        context: ErrorContext,
    },
    /// GStreamer adapter errors, stored as text so the variant exists without the feature
    #[error("GStreamer error{}: {message}", .element.as_deref().map(|e| format!(" in element '{e}'")).unwrap_or_default())]
    GStreamer {
        element: Option<String>,
        message: String,
        context: ErrorContext,
    },
}

impl CaptureError {
    /// Create an allocation error
    pub fn allocation(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Allocation {
            resource: resource.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Critical),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
            context: ErrorContext::new().with_severity(ErrorSeverity::Warning),
        }
    }

    /// Create an unsupported-format error
    pub fn unsupported_format(
        requested: ImageFormat,
        source_format: ImageFormat,
        supported: Vec<ImageFormat>,
    ) -> Self {
        Self::UnsupportedFormat {
            requested,
            source_format,
            supported,
            context: ErrorContext::new(),
        }
    }

    /// Create an end-of-stream error
    pub fn stream_ended() -> Self {
        Self::StreamEnded {
            context: ErrorContext::new()
                .with_severity(ErrorSeverity::Fatal),
        }
        .with_recovery_suggestion("Construct a new capture engine to read the source again")
    }

    /// Create a pipeline state error
    pub fn pipeline_state(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PipelineState {
            target: target.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
        .retryable()
    }

    /// Create a configuration error
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create an error for a blocking task that was cancelled
    pub fn task_aborted(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TaskAborted {
            task: task.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Fatal),
        }
    }

    /// Create a GStreamer error
    pub fn gstreamer(element: Option<String>, message: impl Into<String>) -> Self {
        Self::GStreamer {
            element,
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    /// Add operation context
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    /// Add recovery suggestion
    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context_mut().recovery_suggestion = Some(suggestion.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.context_mut().severity = severity;
        self
    }

    /// Mark as retryable
    pub fn retryable(mut self) -> Self {
        self.context_mut().retryable = true;
        self
    }

    /// Mark as recoverable
    pub fn recoverable(mut self) -> Self {
        self.context_mut().recoverable = true;
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().metadata.insert(key.into(), value.into());
        self
    }

    /// Get the error context
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Allocation { context, .. } => context,
            Self::Timeout { context, .. } => context,
            Self::UnsupportedFormat { context, .. } => context,
            Self::StreamEnded { context } => context,
            Self::PipelineState { context, .. } => context,
            Self::Config { context, .. } => context,
            Self::TaskAborted { context, .. } => context,
            Self::GStreamer { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Allocation { context, .. } => context,
            Self::Timeout { context, .. } => context,
            Self::UnsupportedFormat { context, .. } => context,
            Self::StreamEnded { context } => context,
            Self::PipelineState { context, .. } => context,
            Self::Config { context, .. } => context,
            Self::TaskAborted { context, .. } => context,
            Self::GStreamer { context, .. } => context,
        }
    }

    /// Get the error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Self::Allocation { .. } => "allocation",
            Self::Timeout { .. } => "timeout",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::StreamEnded { .. } => "stream_ended",
            Self::PipelineState { .. } => "pipeline_state",
            Self::Config { .. } => "config",
            Self::TaskAborted { .. } => "task_aborted",
            Self::GStreamer { .. } => "gstreamer",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_stream_ended(&self) -> bool {
        matches!(self, Self::StreamEnded { .. })
    }
}

/// Result type alias using our custom error type
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Trait for errors that can be retried
pub trait Retryable {
    /// Check if this error can be retried
    fn is_retryable(&self) -> bool;

    /// Get the recommended retry delay in milliseconds
    fn retry_delay_ms(&self) -> Option<u64> {
        None
    }

    /// Get the maximum number of retry attempts
    fn max_retries(&self) -> Option<usize> {
        None
    }
}

impl Retryable for CaptureError {
    fn is_retryable(&self) -> bool {
        self.context().retryable
            || matches!(
                self,
                Self::Timeout { .. } | Self::PipelineState { .. } | Self::Allocation { .. }
            )
    }

    fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            Self::Timeout { .. } => Some(0),
            Self::PipelineState { .. } => Some(500),
            Self::Allocation { .. } => Some(250),
            _ => None,
        }
    }

    fn max_retries(&self) -> Option<usize> {
        match self {
            Self::PipelineState { .. } => Some(5),
            Self::Allocation { .. } => Some(3),
            _ => None,
        }
    }
}

/// Trait for errors that can be recovered from
pub trait Recoverable {
    /// Check if this error can be recovered from
    fn is_recoverable(&self) -> bool;

    /// Get recovery strategies for this error
    fn recovery_strategies(&self) -> Vec<RecoveryStrategy>;
}

/// Recovery strategies for handling errors
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStrategy {
    /// Retry the operation
    Retry { max_attempts: usize, delay_ms: u64 },
    /// Use a fallback method
    Fallback { description: String },
    /// Reinitialize the component
    Reinitialize { component: String },
    /// Skip the current operation
    Skip { reason: String },
    /// Degrade functionality
    Degrade { description: String },
}

impl Recoverable for CaptureError {
    fn is_recoverable(&self) -> bool {
        self.context().recoverable
            || matches!(
                self,
                Self::Timeout { .. }
                    | Self::PipelineState { .. }
                    | Self::Allocation { .. }
                    | Self::UnsupportedFormat { .. }
            )
    }

    fn recovery_strategies(&self) -> Vec<RecoveryStrategy> {
        match self {
            Self::Timeout { .. } => vec![RecoveryStrategy::Retry {
                max_attempts: usize::MAX,
                delay_ms: 0,
            }],
            Self::PipelineState { .. } => vec![
                RecoveryStrategy::Retry {
                    max_attempts: 5,
                    delay_ms: 500,
                },
                RecoveryStrategy::Reinitialize {
                    component: "decode_pipeline".to_string(),
                },
            ],
            Self::Allocation { .. } => vec![
                RecoveryStrategy::Retry {
                    max_attempts: 3,
                    delay_ms: 250,
                },
                RecoveryStrategy::Degrade {
                    description: "Reduce the number of ring buffer slots".to_string(),
                },
            ],
            Self::UnsupportedFormat { supported, .. } => vec![RecoveryStrategy::Fallback {
                description: format!(
                    "Request one of: {}",
                    supported
                        .iter()
                        .map(|f| f.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }],
            Self::StreamEnded { .. } => vec![RecoveryStrategy::Reinitialize {
                component: "capture_engine".to_string(),
            }],
            _ => vec![],
        }
    }
}

/// Trait for errors with severity levels
pub trait HasSeverity {
    fn severity(&self) -> ErrorSeverity;
}

impl HasSeverity for CaptureError {
    fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }
}

/// Trait for errors that provide recovery suggestions
pub trait HasRecoverySuggestion {
    fn recovery_suggestion(&self) -> Option<&str>;
}

impl HasRecoverySuggestion for CaptureError {
    fn recovery_suggestion(&self) -> Option<&str> {
        self.context().recovery_suggestion.as_deref()
    }
}

/// Error classification utilities
pub mod classify {
    use super::*;

    /// Check if an error is transient (may resolve itself)
    pub fn is_transient(error: &CaptureError) -> bool {
        matches!(
            error,
            CaptureError::Timeout { .. } | CaptureError::PipelineState { .. }
        )
    }

    /// Check if an error is fatal for the engine instance
    pub fn is_fatal(error: &CaptureError) -> bool {
        matches!(
            error,
            CaptureError::StreamEnded { .. }
                | CaptureError::Config { .. }
                | CaptureError::TaskAborted { .. }
        ) || error.severity() == ErrorSeverity::Fatal
    }

    /// Get error priority (higher numbers = higher priority)
    pub fn priority(error: &CaptureError) -> u8 {
        match error.severity() {
            ErrorSeverity::Debug => 0,
            ErrorSeverity::Info => 1,
            ErrorSeverity::Warning => 2,
            ErrorSeverity::Error => 3,
            ErrorSeverity::Critical => 4,
            ErrorSeverity::Fatal => 5,
        }
    }
}

#[cfg(feature = "gst-pipeline")]
impl From<gstreamer::glib::Error> for CaptureError {
    fn from(error: gstreamer::glib::Error) -> Self {
        Self::gstreamer(None, error.to_string())
    }
}

#[cfg(feature = "gst-pipeline")]
impl From<gstreamer::glib::BoolError> for CaptureError {
    fn from(error: gstreamer::glib::BoolError) -> Self {
        Self::gstreamer(None, error.to_string())
    }
}
