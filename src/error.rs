use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum Error {
    /// No default audio output device
    NoOutputDevice,
    /// Output device rejected its default configuration
    StreamConfig(cpal::DefaultStreamConfigError),
    BuildStream(cpal::BuildStreamError),
    PlayStream(cpal::PlayStreamError),
    /// MIDI backend or port failure
    Midi(String),
    /// Audio file could not be decoded
    Decode(PathBuf, hound::Error),
    /// Decoded file holds no samples
    EmptyAudio(PathBuf),
    /// Command-line value outside its domain
    InvalidConfig(String),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoOutputDevice => write!(f, "No output device available"),
            Error::StreamConfig(e) => write!(f, "Unsupported output configuration: {}", e),
            Error::BuildStream(e) => write!(f, "Failed to build output stream: {}", e),
            Error::PlayStream(e) => write!(f, "Failed to start output stream: {}", e),
            Error::Midi(msg) => write!(f, "MIDI error: {}", msg),
            Error::Decode(path, e) => write!(f, "Cannot decode {}: {}", path.display(), e),
            Error::EmptyAudio(path) => write!(f, "{} contains no audio", path.display()),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::StreamConfig(e) => Some(e),
            Error::BuildStream(e) => Some(e),
            Error::PlayStream(e) => Some(e),
            Error::Decode(_, e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<cpal::DefaultStreamConfigError> for Error {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        Error::StreamConfig(e)
    }
}

impl From<cpal::BuildStreamError> for Error {
    fn from(e: cpal::BuildStreamError) -> Self {
        Error::BuildStream(e)
    }
}

impl From<cpal::PlayStreamError> for Error {
    fn from(e: cpal::PlayStreamError) -> Self {
        Error::PlayStream(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
