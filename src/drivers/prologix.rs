//! Prologix GPIB-USB controller.
//!
//! The adapter shows up as a serial port; lines starting with `++` configure the controller,
//! everything else is forwarded to the currently addressed instrument.
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use log::debug;
use serialport::SerialPort;

use crate::drivers::bus::GpibBus;
use crate::drivers::error::BenchError;

const ESC: u8 = 27;

pub struct PrologixBus<P: Read + Write + Send = Box<dyn SerialPort>> {
    port: P,
    current_address: Option<u8>,
}

impl PrologixBus<Box<dyn SerialPort>> {
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, BenchError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .open()?;
        debug!("Prologix adapter opened on {port_name}");
        Self::with_port(port)
    }
}

impl<P: Read + Write + Send> PrologixBus<P> {
    /// Puts the adapter in controller mode with manual read-after-write.
    pub fn with_port(port: P) -> Result<Self, BenchError> {
        let mut bus = Self {
            port,
            current_address: None,
        };
        for setup in ["++mode 1", "++auto 0", "++eoi 1", "++eos 2"] {
            bus.send_line(setup.as_bytes())?;
        }
        Ok(bus)
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    fn send_line(&mut self, line: &[u8]) -> Result<(), BenchError> {
        self.port.write_all(line)?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        Ok(())
    }

    fn select(&mut self, address: u8) -> Result<(), BenchError> {
        if self.current_address != Some(address) {
            self.send_line(format!("++addr {address}").as_bytes())?;
            self.current_address = Some(address);
        }
        Ok(())
    }

    fn read_line(&mut self, address: u8) -> Result<String, BenchError> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => line.push(byte[0]),
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    if line.is_empty() {
                        return Err(BenchError::NoResponse(address));
                    }
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        if line.is_empty() {
            return Err(BenchError::NoResponse(address));
        }
        Ok(String::from_utf8_lossy(&line).trim_end().to_owned())
    }
}

/// Escapes the bytes the adapter would otherwise interpret (CR, LF, ESC, '+').
fn escape_payload(command: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(command.len());
    for &b in command.as_bytes() {
        if matches!(b, b'\r' | b'\n' | ESC | b'+') {
            out.push(ESC);
        }
        out.push(b);
    }
    out
}

impl<P: Read + Write + Send> GpibBus for PrologixBus<P> {
    fn write(&mut self, address: u8, command: &str) -> Result<(), BenchError> {
        self.select(address)?;
        let payload = escape_payload(command);
        self.send_line(&payload)
    }

    fn read(&mut self, address: u8) -> Result<String, BenchError> {
        self.select(address)?;
        self.send_line(b"++read eoi")?;
        self.read_line(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Serial stand-in: records everything written, replays canned answers.
    struct LoopbackPort {
        written: Vec<u8>,
        answers: VecDeque<u8>,
    }

    impl Read for LoopbackPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.answers.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => Err(std::io::Error::new(ErrorKind::TimedOut, "timeout")),
            }
        }
    }

    impl Write for LoopbackPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn port(answers: &str) -> LoopbackPort {
        LoopbackPort {
            written: Vec::new(),
            answers: answers.bytes().collect(),
        }
    }

    #[test]
    fn addresses_only_when_target_changes() {
        let mut bus = PrologixBus::with_port(port("")).unwrap();
        bus.write(12, ":OUTP ON").unwrap();
        bus.write(12, ":SOUR:CURR 0.001").unwrap();
        bus.write(7, ":SENS:CHAN 1").unwrap();
        let sent = String::from_utf8(bus.into_inner().written).unwrap();
        assert_eq!(sent.matches("++addr 12").count(), 1);
        assert_eq!(sent.matches("++addr 7").count(), 1);
        assert!(sent.starts_with("++mode 1\n++auto 0\n"));
    }

    #[test]
    fn read_returns_one_line_and_escapes_plus() {
        let mut bus = PrologixBus::with_port(port("+1.5E-03\n")).unwrap();
        bus.write(7, ":READ?").unwrap();
        assert_eq!(bus.read(7).unwrap(), "+1.5E-03");
        assert!(matches!(bus.read(7), Err(BenchError::NoResponse(7))));
        assert_eq!(escape_payload("+1"), vec![ESC, b'+', b'1']);
    }
}
