//! JSON-file pairing store: one record per stick serial.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use cnl24_lib::error::CnlError;
use cnl24_lib::session::{PairingRecord, PairingStore};
use tracing::debug;

pub struct JsonPairingStore {
    path: PathBuf,
    records: HashMap<String, PairingRecord>,
}

impl JsonPairingStore {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let records = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, records })
    }

    fn persist(&self) -> Result<(), CnlError> {
        let contents = serde_json::to_string_pretty(&self.records)
            .map_err(|err| CnlError::Io(io::Error::other(err)))?;
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl PairingStore for JsonPairingStore {
    fn load(&mut self, stick_serial: &str) -> Result<PairingRecord, CnlError> {
        Ok(self.records.get(stick_serial).cloned().unwrap_or_default())
    }

    fn save(&mut self, stick_serial: &str, record: &PairingRecord) -> Result<(), CnlError> {
        debug!(stick_serial, channel = record.last_radio_channel, "saving pairing record");
        self.records.insert(stick_serial.to_string(), record.clone());
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_json_file() {
        let path = std::env::temp_dir().join("cnl24-store-test.json");
        let _ = fs::remove_file(&path);

        let mut store = JsonPairingStore::open(path.clone()).unwrap();
        let record = PairingRecord {
            last_radio_channel: 0x11,
            ..PairingRecord::default()
        };
        store.save("6229-1234567", &record).unwrap();

        let mut reopened = JsonPairingStore::open(path.clone()).unwrap();
        assert_eq!(reopened.load("6229-1234567").unwrap(), record);
        // unknown serials get the default channel
        assert_eq!(
            reopened.load("other").unwrap().last_radio_channel,
            0x14
        );
        let _ = fs::remove_file(&path);
    }
}
