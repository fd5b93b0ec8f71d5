//! Byte transport between the UART and the frame decoder.
//!
//! The decoder consumes one byte at a time through [`ByteSource`].
//! [`SerialReader`] provides that over any [`Transport`], retrying reads that
//! report "not ready" according to a [`RetryPolicy`].

use embedded_hal::delay::DelayNs;
use embedded_io::{Error as _, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadMode {
    /// Wait until data is available.
    Blocking,
    /// Report [`TransportError::NotReady`] when no data is buffered.
    NonBlocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Nothing buffered yet. Only returned by non-blocking reads.
    NotReady,
    /// A non-blocking read stayed "not ready" for the whole retry budget.
    RetriesExhausted,
    /// The underlying stream returned zero bytes.
    EndOfStream,
    /// The UART reported an error.
    Io(ErrorKind),
    /// A decode cycle consumed its byte budget without completing a frame.
    NoFrame,
    /// A decode cycle ran past its deadline.
    Timeout,
}

#[cfg(feature = "defmt")]
impl defmt::Format for TransportError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            TransportError::NotReady => defmt::write!(f, "NotReady"),
            TransportError::RetriesExhausted => defmt::write!(f, "RetriesExhausted"),
            TransportError::EndOfStream => defmt::write!(f, "EndOfStream"),
            TransportError::Io(kind) => defmt::write!(f, "Io({})", defmt::Debug2Format(kind)),
            TransportError::NoFrame => defmt::write!(f, "NoFrame"),
            TransportError::Timeout => defmt::write!(f, "Timeout"),
        }
    }
}

/// Read primitive over the physical link.
pub trait Transport {
    /// Reads up to `buf.len()` bytes, returning how many were read.
    fn read(&mut self, buf: &mut [u8], mode: ReadMode) -> Result<usize, TransportError>;
}

/// A source of single bytes for the decoder.
pub trait ByteSource {
    fn read_byte(&mut self) -> Result<u8, TransportError>;
}

/// Bounded retry for "not ready" reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryPolicy {
    /// Retries after the first non-blocking attempt before giving up.
    pub max_retries: u32,
    /// Pause between attempts.
    pub delay_ms: u32,
}

/// Adapts a blocking `embedded_io` UART.
///
/// Non-blocking reads consult `ReadReady` first so they never stall.
pub struct IoTransport<R> {
    port: R,
}

impl<R> IoTransport<R> {
    pub fn new(port: R) -> Self {
        Self { port }
    }

    pub fn into_inner(self) -> R {
        self.port
    }
}

impl<R> Transport for IoTransport<R>
where
    R: embedded_io::Read + embedded_io::ReadReady,
{
    fn read(&mut self, buf: &mut [u8], mode: ReadMode) -> Result<usize, TransportError> {
        if mode == ReadMode::NonBlocking {
            let ready = self
                .port
                .read_ready()
                .map_err(|e| TransportError::Io(e.kind()))?;
            if !ready {
                return Err(TransportError::NotReady);
            }
        }

        match self.port.read(buf) {
            Ok(0) if !buf.is_empty() => Err(TransportError::EndOfStream),
            Ok(n) => Ok(n),
            Err(e) => Err(TransportError::Io(e.kind())),
        }
    }
}

/// Single-byte reader with the retry discipline of the sensor link.
///
/// Blocking mode retries a spurious "not ready" indefinitely. Non-blocking
/// mode gives up with [`TransportError::RetriesExhausted`] once the policy's
/// budget is spent.
pub struct SerialReader<T, D> {
    transport: T,
    delay: D,
    mode: ReadMode,
    retry: RetryPolicy,
}

impl<T: Transport, D: DelayNs> SerialReader<T, D> {
    pub fn new(transport: T, delay: D, mode: ReadMode, retry: RetryPolicy) -> Self {
        Self {
            transport,
            delay,
            mode,
            retry,
        }
    }

    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: Transport, D: DelayNs> ByteSource for SerialReader<T, D> {
    fn read_byte(&mut self) -> Result<u8, TransportError> {
        let mut buf = [0u8; 1];
        let mut retries = 0u32;
        loop {
            match self.transport.read(&mut buf, self.mode) {
                Ok(1) => return Ok(buf[0]),
                Ok(_) => return Err(TransportError::EndOfStream),
                Err(TransportError::NotReady) => {
                    if self.mode == ReadMode::NonBlocking {
                        if retries >= self.retry.max_retries {
                            error!("No data to receive after {} retries", retries);
                            return Err(TransportError::RetriesExhausted);
                        }
                        retries += 1;
                    } else {
                        trace!("Blocking read not ready, waiting");
                    }
                    self.delay.delay_ms(self.retry.delay_ms);
                }
                Err(e) => {
                    error!("UART read failed: {:?}", e);
                    return Err(e);
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn reads_bytes_in_order() {
        let mut r = reader(ScriptedTransport::from_bytes(&[1, 2, 3]), ReadMode::Blocking);
        assert_eq!(r.read_byte(), Ok(1));
        assert_eq!(r.read_byte(), Ok(2));
        assert_eq!(r.read_byte(), Ok(3));
        assert_eq!(r.read_byte(), Err(TransportError::EndOfStream));
    }

    #[test]
    fn non_blocking_retries_are_bounded() {
        let mut t = ScriptedTransport::default();
        for _ in 0..10 {
            t.push(Step::NotReady);
        }
        let mut r = reader(t, ReadMode::NonBlocking);
        assert_eq!(r.read_byte(), Err(TransportError::RetriesExhausted));
        // First attempt plus RETRY.max_retries retries.
        assert_eq!(r.transport_mut().reads, 4);
        assert_eq!(r.delay.waits_ms.len(), 3);
    }

    #[test]
    fn non_blocking_recovers_within_budget() {
        let mut t = ScriptedTransport::default();
        t.push(Step::NotReady);
        t.push(Step::NotReady);
        t.push_bytes(&[0x42]);
        let mut r = reader(t, ReadMode::NonBlocking);
        assert_eq!(r.read_byte(), Ok(0x42));
        assert_eq!(r.delay.waits_ms, [100, 100]);
    }

    #[test]
    fn blocking_mode_keeps_waiting() {
        let mut t = ScriptedTransport::default();
        for _ in 0..25 {
            t.push(Step::NotReady);
        }
        t.push_bytes(&[0x4D]);
        let mut r = reader(t, ReadMode::Blocking);
        assert_eq!(r.read_byte(), Ok(0x4D));
        assert_eq!(r.delay.waits_ms.len(), 25);
    }

    #[test]
    fn hard_errors_are_not_retried() {
        let mut t = ScriptedTransport::default();
        t.push(Step::Fail(TransportError::Io(ErrorKind::Other)));
        t.push_bytes(&[0x42]);
        let mut r = reader(t, ReadMode::NonBlocking);
        assert_eq!(r.read_byte(), Err(TransportError::Io(ErrorKind::Other)));
        assert_eq!(r.read_byte(), Ok(0x42));
    }

    /// A UART that never has data buffered.
    #[derive(Default)]
    struct IdleUart {
        ready_polls: usize,
    }

    impl embedded_io::ErrorType for IdleUart {
        type Error = ErrorKind;
    }

    impl embedded_io::Read for IdleUart {
        fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> {
            panic!("non-blocking read must not touch an idle UART");
        }
    }

    impl embedded_io::ReadReady for IdleUart {
        fn read_ready(&mut self) -> Result<bool, Self::Error> {
            self.ready_polls += 1;
            Ok(false)
        }
    }

    #[test]
    fn idle_uart_exhausts_non_blocking_retries() {
        let mut r = SerialReader::new(
            IoTransport::new(IdleUart::default()),
            RecordingDelay::default(),
            ReadMode::NonBlocking,
            RETRY,
        );
        assert_eq!(r.read_byte(), Err(TransportError::RetriesExhausted));
        assert_eq!(r.transport_mut().port.ready_polls, 4);
        assert_eq!(r.delay.waits_ms, [100, 100, 100]);
    }

    #[test]
    fn io_transport_reads_from_slice() {
        let data: &[u8] = &[0x42, 0x4D];
        let mut t = IoTransport::new(data);
        let mut buf = [0u8; 1];
        assert_eq!(t.read(&mut buf, ReadMode::NonBlocking), Ok(1));
        assert_eq!(buf, [0x42]);
        assert_eq!(t.read(&mut buf, ReadMode::Blocking), Ok(1));
        assert_eq!(buf, [0x4D]);
        assert_eq!(
            t.read(&mut buf, ReadMode::Blocking),
            Err(TransportError::EndOfStream)
        );
    }
}
