//! Connection-scoped mutable state: identifiers, the link key, and the three
//! independent sequence counters used by the layered envelopes.

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::CnlError;

/// State for one dongle/pump connection attempt. Created per connection,
/// dropped at teardown; nothing here outlives the session except what the
/// caller writes back through a [`PairingStore`].
#[derive(Debug)]
pub struct PumpSession {
    stick_serial: String,
    /// 48-bit radio MACs carried in 64-bit fields.
    pub link_mac: u64,
    pub pump_mac: u64,
    pub radio_channel: u8,
    pub radio_rssi_percent: u8,
    key: Option<[u8; 16]>,
    cnl_sequence: u8,
    med_sequence: u8,
    comd_sequence: u8,
}

impl PumpSession {
    pub fn new(stick_serial: &str) -> Self {
        Self {
            stick_serial: stick_serial.to_string(),
            link_mac: 0,
            pump_mac: 0,
            radio_channel: 0,
            radio_rssi_percent: 0,
            key: None,
            cnl_sequence: 1,
            med_sequence: 1,
            comd_sequence: 1,
        }
    }

    pub fn stick_serial(&self) -> &str {
        &self.stick_serial
    }

    pub fn set_stick_serial(&mut self, serial: &str) {
        self.stick_serial = serial.to_string();
    }

    pub fn link_serial(&self) -> u32 {
        (self.link_mac & 0xff_ffff) as u32
    }

    pub fn pump_serial(&self) -> u32 {
        (self.pump_mac & 0xff_ffff) as u32
    }

    pub fn pairing_hmac(&self) -> [u8; 32] {
        crypto::pairing_hmac(&self.stick_serial)
    }

    pub fn set_key(&mut self, key: [u8; 16]) {
        self.key = Some(key);
    }

    pub fn key(&self) -> Result<&[u8; 16], CnlError> {
        self.key
            .as_ref()
            .ok_or_else(|| CnlError::MissingPairing(self.stick_serial.clone()))
    }

    /// IV = radio channel byte followed by key[1..16]. Changing the channel
    /// changes the IV, so it must be re-read after negotiation.
    pub fn iv(&self) -> Result<[u8; 16], CnlError> {
        let key = self.key()?;
        let mut iv = [0u8; 16];
        iv[0] = self.radio_channel;
        iv[1..].copy_from_slice(&key[1..]);
        Ok(iv)
    }

    pub fn encrypt(&self, clear: &[u8]) -> Result<Vec<u8>, CnlError> {
        Ok(crypto::encrypt(self.key()?, &self.iv()?, clear))
    }

    pub fn decrypt(&self, encrypted: &[u8]) -> Result<Vec<u8>, CnlError> {
        Ok(crypto::decrypt(self.key()?, &self.iv()?, encrypted))
    }

    /// Dongle-envelope sequence: mod 256, never zero. Returns the value to
    /// put on the wire and advances the counter.
    pub(crate) fn next_cnl_sequence(&mut self) -> u8 {
        let value = self.cnl_sequence;
        self.cnl_sequence = self.cnl_sequence.wrapping_add(1);
        if self.cnl_sequence == 0 {
            self.cnl_sequence = 1;
        }
        value
    }

    /// Encrypted-message sequence: mod 128, never zero.
    pub(crate) fn next_med_sequence(&mut self) -> u8 {
        let value = self.med_sequence;
        self.med_sequence = (self.med_sequence + 1) & 0x7f;
        if self.med_sequence == 0 {
            self.med_sequence = 1;
        }
        value
    }

    /// ComD request sequence: mod 128, never zero. 0x80 is reserved for the
    /// high-speed-mode control message and never produced here.
    pub(crate) fn next_comd_sequence(&mut self) -> u8 {
        let value = self.comd_sequence;
        self.comd_sequence = (self.comd_sequence + 1) & 0x7f;
        if self.comd_sequence == 0 {
            self.comd_sequence = 1;
        }
        value
    }
}

/// Per-stick pairing data that outlives a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRecord {
    /// Hex-encoded pairing digest, if captured at pairing time.
    #[serde(default)]
    pub hmac: String,
    /// Hex-encoded AES key, if captured at pairing time.
    #[serde(default)]
    pub key: String,
    pub last_radio_channel: u8,
}

impl Default for PairingRecord {
    fn default() -> Self {
        Self {
            hmac: String::new(),
            key: String::new(),
            last_radio_channel: 0x14,
        }
    }
}

/// Keyed store for pairing data, one record per stick serial. The only
/// persistent state in the system; backed by whatever the caller provides.
pub trait PairingStore {
    fn load(&mut self, stick_serial: &str) -> Result<PairingRecord, CnlError>;
    fn save(&mut self, stick_serial: &str, record: &PairingRecord) -> Result<(), CnlError>;
}

/// In-memory store for tests and one-shot sessions.
#[derive(Debug, Default)]
pub struct MemoryPairingStore {
    records: std::collections::HashMap<String, PairingRecord>,
}

impl PairingStore for MemoryPairingStore {
    fn load(&mut self, stick_serial: &str) -> Result<PairingRecord, CnlError> {
        Ok(self.records.get(stick_serial).cloned().unwrap_or_default())
    }

    fn save(&mut self, stick_serial: &str, record: &PairingRecord) -> Result<(), CnlError> {
        self.records.insert(stick_serial.to_string(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_counters_skip_zero() {
        let mut session = PumpSession::new("1234567");
        let mut last = 0u8;
        for i in 0..600 {
            let v = session.next_cnl_sequence();
            assert_ne!(v, 0, "cnl sequence hit zero at step {i}");
            if i > 0 {
                let expected = if last == 0xff { 1 } else { last + 1 };
                assert_eq!(v, expected);
            }
            last = v;
        }

        let mut last = 0u8;
        for i in 0..300 {
            let v = session.next_comd_sequence();
            assert_ne!(v, 0);
            assert!(v < 0x80, "comd sequence left the 7-bit range");
            if i > 0 {
                let expected = if last == 0x7f { 1 } else { last + 1 };
                assert_eq!(v, expected);
            }
            last = v;
        }
    }

    #[test]
    fn iv_derives_from_channel_and_key_tail() {
        let mut session = PumpSession::new("1234567");
        session.set_key([
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ]);
        session.radio_channel = 0x14;
        let iv = session.iv().unwrap();
        assert_eq!(iv[0], 0x14);
        assert_eq!(&iv[1..], &session.key().unwrap()[1..]);

        // the channel byte feeds the IV, so changing it changes the IV
        session.radio_channel = 0x11;
        assert_eq!(session.iv().unwrap()[0], 0x11);
    }

    #[test]
    fn missing_key_is_a_pairing_error() {
        let session = PumpSession::new("1234567");
        assert!(matches!(session.iv(), Err(CnlError::MissingPairing(_))));
    }
}
