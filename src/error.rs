use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to load image at '{0}': {1}")]
    Image(PathBuf, image::ImageError),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("label map error: {0}")]
    Labels(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("model record error: {0}")]
    Recorder(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("tensor data error: {0}")]
    Tensor(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::Dataset("no class directories".to_string());
        assert_eq!(err.to_string(), "dataset error: no class directories");

        let err = Error::Image(
            PathBuf::from("cats/cat.1.jpg"),
            image::ImageError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "missing",
            )),
        );
        assert!(err.to_string().contains("cat.1.jpg"));
    }

    #[test]
    fn io_errors_convert() {
        fn read() -> Result<String> {
            Ok(std::fs::read_to_string("/definitely/not/here.csv")?)
        }

        assert!(matches!(read(), Err(Error::Io(_))));
    }
}
