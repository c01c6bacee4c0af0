//! # VE.Direct Byte Source
//!
//! Opens the byte stream the decoder worker reads from.
//!
//! This module handles:
//! - Opening a serial device at 19,200 baud 8N1 (the only VE.Direct setting)
//! - Opening a regular file instead, for replaying captures
//! - Auto-detecting the device among common USB serial paths

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::{Result, VeError};
use crate::vedirect::protocol::VE_BAUD_RATE;

/// Device paths to try when none is configured (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // VE.Direct to USB cable
    "/dev/ttyACM0",
];

/// What kind of source was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Serial,
    File,
}

enum Inner {
    Serial(tokio_serial::SerialStream),
    File(tokio::fs::File),
}

/// An open VE.Direct byte source
pub struct VeSource {
    inner: Inner,
    /// Device or file path
    device_path: String,
}

impl fmt::Debug for VeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VeSource")
            .field("device_path", &self.device_path)
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

impl VeSource {
    /// Open `path`: a regular file is replayed, anything else is opened as a
    /// serial device
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be opened, `Serial` if the device
    /// cannot be opened or configured
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ve_telemetry::serial::VeSource;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let source = VeSource::open("/dev/ttyUSB0").await?;
    ///     println!("reading {}", source.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub async fn open(path: &str) -> Result<Self> {
        let is_file = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);

        if is_file {
            let file = tokio::fs::File::open(path).await?;
            info!("Replaying VE.Direct capture {}", path);
            return Ok(Self {
                inner: Inner::File(file),
                device_path: path.to_string(),
            });
        }

        let port = Self::open_port(path)?;
        info!("Opened VE.Direct device at {}", path);
        Ok(Self {
            inner: Inner::Serial(port),
            device_path: path.to_string(),
        })
    }

    /// Open the configured `port`, or auto-detect a device when it is empty
    ///
    /// # Errors
    ///
    /// As [`VeSource::open`] for a configured port, `SerialPortNotFound` when
    /// no default device could be opened
    pub async fn open_or_detect(port: &str) -> Result<Self> {
        Self::open_or_detect_with(port, DEFAULT_DEVICE_PATHS).await
    }

    async fn open_or_detect_with(port: &str, candidates: &[&str]) -> Result<Self> {
        if port.is_empty() {
            info!("No serial port configured, trying {}", candidates.join(", "));
            return Self::open_with_paths(candidates);
        }
        Self::open(port).await
    }

    /// Open the first serial device that works out of `paths`
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` listing every path tried
    pub fn open_with_paths(paths: &[&str]) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path) {
                Ok(port) => {
                    info!("Opened VE.Direct device at {}", path);
                    return Ok(Self {
                        inner: Inner::Serial(port),
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(VeError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a serial port with VE.Direct settings: 19200 8N1, no flow control
    fn open_port(path: &str) -> Result<tokio_serial::SerialStream> {
        tokio_serial::new(path, VE_BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| VeError::Serial(format!("Failed to open {}: {}", path, e)))
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn kind(&self) -> SourceKind {
        match self.inner {
            Inner::Serial(_) => SourceKind::Serial,
            Inner::File(_) => SourceKind::File,
        }
    }
}

impl AsyncRead for VeSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut self.get_mut().inner {
            Inner::Serial(port) => Pin::new(port).poll_read(cx, buf),
            Inner::File(file) => Pin::new(file).poll_read(cx, buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vedirect::encoder::encode_text_block;
    use std::io::Write;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_constants() {
        assert_eq!(VE_BAUD_RATE, 19_200);
        assert_eq!(DEFAULT_DEVICE_PATHS[0], "/dev/ttyUSB0");
    }

    #[test]
    fn test_open_with_invalid_paths_returns_error() {
        let invalid_paths = &["/dev/nonexistent0", "/dev/nonexistent1"];
        let err = VeSource::open_with_paths(invalid_paths).unwrap_err();

        match err {
            VeError::SerialPortNotFound(msg) => {
                assert!(msg.contains("/dev/nonexistent0"));
                assert!(msg.contains("/dev/nonexistent1"));
            }
            _ => panic!("Expected SerialPortNotFound error, got: {:?}", err),
        }
    }

    #[test]
    fn test_open_with_empty_paths_returns_error() {
        let empty_paths: &[&str] = &[];
        match VeSource::open_with_paths(empty_paths).unwrap_err() {
            VeError::SerialPortNotFound(_) => {}
            other => panic!("Expected SerialPortNotFound, got: {:?}", other),
        }
    }

    #[test]
    fn test_open_port_with_invalid_path_returns_error() {
        let err = VeSource::open_port("/dev/nonexistent_serial_device_12345").unwrap_err();

        match err {
            VeError::Serial(msg) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            _ => panic!("Expected Serial error, got: {:?}", err),
        }
    }

    #[tokio::test]
    async fn test_open_regular_file_replays_bytes() {
        let block = encode_text_block(&[("V", "12800")]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&block).unwrap();
        file.flush().unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let mut source = VeSource::open(&path).await.unwrap();
        assert_eq!(source.kind(), SourceKind::File);
        assert_eq!(source.device_path(), path);

        let mut out = Vec::new();
        source.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, block);
    }

    #[tokio::test]
    async fn test_open_missing_path_is_serial_error() {
        let result = VeSource::open("/dev/nonexistent_serial_device_12345").await;
        assert!(matches!(result, Err(VeError::Serial(_))));
    }

    #[tokio::test]
    async fn test_empty_port_tries_candidates() {
        let candidates = &["/dev/nonexistent0", "/dev/nonexistent1"];
        match VeSource::open_or_detect_with("", candidates).await.unwrap_err() {
            VeError::SerialPortNotFound(msg) => assert!(msg.contains("/dev/nonexistent1")),
            other => panic!("Expected SerialPortNotFound, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_configured_port_skips_detection() {
        let block = encode_text_block(&[("V", "12800")]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&block).unwrap();
        file.flush().unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let source = VeSource::open_or_detect_with(&path, &["/dev/nonexistent0"])
            .await
            .unwrap();
        assert_eq!(source.kind(), SourceKind::File);
    }

    #[tokio::test]
    #[ignore] // Needs a VE.Direct cable: cargo test -- --ignored
    async fn test_open_with_real_hardware() {
        match VeSource::open_with_paths(DEFAULT_DEVICE_PATHS) {
            Ok(source) => println!("Opened VE.Direct device at: {}", source.device_path()),
            Err(_) => println!("No VE.Direct hardware detected (this is OK for CI/CD)"),
        }
    }
}
