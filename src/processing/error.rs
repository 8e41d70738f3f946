use std::fmt;

/// Failures raised by pipeline stages.
///
/// Precondition violations are reported before a stage touches any data.
/// Geometry degeneracies during palette extraction are not errors; they are
/// absorbed with fallbacks and logged.
#[derive(Debug, Clone, PartialEq)]
pub enum StageError {
    /// Two operands (or an operand and its output) differ in dimensions.
    ShapeMismatch {
        stage: &'static str,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// Blur radius above the supported maximum.
    RadiusTooLarge { radius: u32, max: u32 },
    /// Blur sigma must be positive and finite.
    InvalidSigma(f32),
    /// An empty (0-sized or unloaded) image was passed where pixels are required.
    EmptyImage(&'static str),
    /// Image exceeds a fixed dimension limit of the stage.
    ImageTooLarge { width: u32, height: u32, max: u32 },
    /// A frame was requested before any image was loaded.
    NotLoaded,
    /// Device, pipeline or readback failure in the compute backend.
    Backend(String),
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::ShapeMismatch {
                stage,
                expected,
                actual,
            } => write!(
                f,
                "{stage}: shape mismatch, expected {}x{} but got {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
            StageError::RadiusTooLarge { radius, max } => {
                write!(f, "blur radius {radius} exceeds maximum of {max}")
            }
            StageError::InvalidSigma(sigma) => write!(f, "blur sigma must be > 0, got {sigma}"),
            StageError::EmptyImage(stage) => write!(f, "{stage}: empty image"),
            StageError::ImageTooLarge { width, height, max } => write!(
                f,
                "image {width}x{height} exceeds the supported maximum dimension of {max}"
            ),
            StageError::NotLoaded => write!(f, "no image loaded"),
            StageError::Backend(msg) => write!(f, "compute backend failure: {msg}"),
        }
    }
}

impl std::error::Error for StageError {}

/// Fails with [`StageError::ShapeMismatch`] unless both dimension pairs agree.
pub fn ensure_same_shape(
    stage: &'static str,
    expected: (u32, u32),
    actual: (u32, u32),
) -> Result<(), StageError> {
    if expected != actual {
        return Err(StageError::ShapeMismatch {
            stage,
            expected,
            actual,
        });
    }
    Ok(())
}
