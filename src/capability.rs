//! Dust-sensor capability: answers "current dust level" (PM10) and "current
//! fine dust level" (PM2.5) requests from the latest validated reading.

use core::fmt;

use crate::sensors::ReadingStore;

pub const RES_DUST_SENSOR: &str = "/capability/dustSensor/main/0";
/// PM10, µg/m³.
pub const PROP_DUST_LEVEL: &str = "dustLevel";
/// PM2.5, µg/m³.
pub const PROP_FINE_DUST_LEVEL: &str = "fineDustLevel";

const MAX_PROPERTIES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    UnsupportedUri,
}

/// Read-only view over the store for request handlers.
#[derive(Clone, Copy)]
pub struct DustSensor<'a> {
    store: &'a ReadingStore,
}

impl<'a> DustSensor<'a> {
    pub fn new(store: &'a ReadingStore) -> Self {
        Self { store }
    }

    pub fn dust_level(&self) -> u32 {
        self.store.snapshot().pm10 as u32
    }

    pub fn fine_dust_level(&self) -> u32 {
        self.store.snapshot().pm2_5 as u32
    }

    /// Fills in each requested property that this capability knows. Both
    /// levels come from the same snapshot.
    pub fn get(&self, keys: &[&str]) -> Representation {
        let reading = self.store.snapshot();
        let mut rep = Representation::default();
        for key in keys {
            let (name, value) = match *key {
                PROP_DUST_LEVEL => (PROP_DUST_LEVEL, reading.pm10),
                PROP_FINE_DUST_LEVEL => (PROP_FINE_DUST_LEVEL, reading.pm2_5),
                _ => continue,
            };
            rep.set(name, value as u32);
        }
        rep
    }
}

/// Property values of a GET response, in request order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Representation {
    values: heapless::Vec<(&'static str, u32), MAX_PROPERTIES>,
}

impl Representation {
    pub fn get(&self, key: &str) -> Option<u32> {
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        self.values.iter().copied()
    }

    fn set(&mut self, key: &'static str, value: u32) {
        if let Some(slot) = self.values.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            // At most one slot per known property, so there is always room.
            let _ = self.values.push((key, value));
        }
    }
}

/// JSON object, e.g. `{"dustLevel":30,"fineDustLevel":20}`.
impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "\"{}\":{}", key, value)?;
        }
        f.write_str("}")
    }
}

/// Routes a GET request by resource URI.
pub fn handle_get_request(
    store: &ReadingStore,
    uri: &str,
    keys: &[&str],
) -> Result<Representation, RequestError> {
    debug!("GET request on {}", uri);
    match uri {
        RES_DUST_SENSOR => Ok(DustSensor::new(store).get(keys)),
        _ => {
            warn!("Not supported uri: {}", uri);
            Err(RequestError::UnsupportedUri)
        }
    }
}
