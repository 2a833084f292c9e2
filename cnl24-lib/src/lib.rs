pub mod comd;
pub mod constants;
pub mod crypto;
pub mod cursor;
pub mod device;
pub mod envelope;
pub mod error;
pub mod events;
pub mod history;
pub mod lzo;
pub mod multipacket;
pub mod responses;
pub mod session;
pub mod time;
pub mod transport;

// Re-export the main entry points for easy access
pub use device::{NegotiationOutcome, PumpDevice};
pub use error::CnlError;
pub use session::{MemoryPairingStore, PairingRecord, PairingStore, PumpSession};
pub use transport::UsbHidDevice;
