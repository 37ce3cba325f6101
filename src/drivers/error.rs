use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("bus I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("GPIB library unavailable: {0}")]
    Library(String),
    #[error("{call} failed on GPIB address {address} (iberr {code})")]
    Gpib {
        call: &'static str,
        address: u8,
        code: i32,
    },
    #[error("instrument at GPIB address {0} did not answer")]
    NoResponse(u8),
    #[error("could not parse instrument reading {0:?}")]
    Parse(String),
    #[error("instrument bus lock poisoned")]
    Poisoned,
    #[error("diode voltage {0} V outside the DT-470 calibration range")]
    TemperatureOutOfRange(f64),
    #[error("failed to render plot: {0}")]
    Plot(String),
}

impl BenchError {
    /// Readings that failed in a way the acquisition loop treats as "drop this sample".
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BenchError::Io(_)
                | BenchError::Gpib { .. }
                | BenchError::NoResponse(_)
                | BenchError::Parse(_)
                | BenchError::TemperatureOutOfRange(_)
        )
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for BenchError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        BenchError::Plot(format!("{value:?}"))
    }
}

impl From<image::ImageError> for BenchError {
    fn from(value: image::ImageError) -> Self {
        BenchError::Plot(value.to_string())
    }
}
