pub mod frame;
pub mod pms7003;
pub mod poller;
pub mod reading_store;
pub mod transport;

pub use frame::{ConcentrationReading, RawFrame};
pub use pms7003::{DecodeOutcome, DecoderState, Pms7003, PmsError, decode_once, decode_once_async};
pub use poller::Poller;
pub use reading_store::{DecoderHealth, ReadingStore, StoreStatus};
pub use transport::{
    ByteSource, IoTransport, ReadMode, RetryPolicy, SerialReader, Transport, TransportError,
};
