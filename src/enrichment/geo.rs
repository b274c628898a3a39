// Country database lifecycle

use anyhow::Result;
use std::net::IpAddr;
use std::path::Path;

/// Country lookup backend
pub trait CountryDatabase: Send + Sync {
    /// English country name for an address, `None` if the database has no entry
    fn country(&self, ip: IpAddr) -> Result<Option<String>>;
}

/// State of the country database, decided once at startup
pub enum GeoDatabase {
    /// No database configured
    NotLoaded,
    Loaded(Box<dyn CountryDatabase>),
    /// Configured but unreadable or corrupt
    LoadFailed(String),
}

impl GeoDatabase {
    /// Load a MaxMind country database, degrading to `LoadFailed` on any error
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return GeoDatabase::NotLoaded;
        };

        match open_database(path) {
            Ok(db) => {
                log::info!("Loaded country database from {:?}", path);
                GeoDatabase::Loaded(db)
            }
            Err(e) => {
                log::debug!("Country database unavailable: {:#}", e);
                GeoDatabase::LoadFailed(format!("{:#}", e))
            }
        }
    }

    #[cfg(test)]
    pub fn from_backend(db: impl CountryDatabase + 'static) -> Self {
        GeoDatabase::Loaded(Box::new(db))
    }

    /// Short label for status display
    pub fn status(&self) -> String {
        match self {
            GeoDatabase::NotLoaded => "no country database".to_string(),
            GeoDatabase::Loaded(_) => "country database loaded".to_string(),
            GeoDatabase::LoadFailed(e) => format!("country database failed: {}", e),
        }
    }
}

#[cfg(feature = "geoip")]
fn open_database(path: &Path) -> Result<Box<dyn CountryDatabase>> {
    Ok(Box::new(maxmind::MaxMindCountry::open(path)?))
}

#[cfg(not(feature = "geoip"))]
fn open_database(path: &Path) -> Result<Box<dyn CountryDatabase>> {
    anyhow::bail!("built without geoip support, ignoring {:?}", path)
}

#[cfg(feature = "geoip")]
mod maxmind {
    use super::CountryDatabase;
    use anyhow::{Context, Result};
    use maxminddb::{MaxMindDBError, Reader, geoip2};
    use std::net::IpAddr;
    use std::path::Path;

    pub struct MaxMindCountry {
        reader: Reader<Vec<u8>>,
    }

    impl MaxMindCountry {
        pub fn open(path: &Path) -> Result<Self> {
            let reader = Reader::open_readfile(path)
                .with_context(|| format!("Failed to open country database: {:?}", path))?;
            Ok(Self { reader })
        }
    }

    impl CountryDatabase for MaxMindCountry {
        fn country(&self, ip: IpAddr) -> Result<Option<String>> {
            match self.reader.lookup::<geoip2::Country>(ip) {
                Ok(record) => Ok(record
                    .country
                    .and_then(|c| c.names)
                    .and_then(|names| names.get("en").map(|n| n.to_string()))),
                Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(None),
                Err(e) => Err(e.into()),
            }
        }
    }
}
