use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use tracing::info;

use super::domain::{
    Company, CompanyContact, CompanyId, ContactChannel, GeoPoint, ServiceArea, TenantId,
};
use super::memory::InMemoryCompanyDirectory;
use super::repository::DirectoryError;

/// Error raised while seeding the in-memory directory from a CSV export.
#[derive(Debug)]
pub enum DirectoryImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    Row { line: usize, reason: String },
    Directory(DirectoryError),
}

impl std::fmt::Display for DirectoryImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryImportError::Io(err) => write!(f, "failed to read company export: {}", err),
            DirectoryImportError::Csv(err) => write!(f, "invalid company CSV data: {}", err),
            DirectoryImportError::Row { line, reason } => {
                write!(f, "company row on line {} rejected: {}", line, reason)
            }
            DirectoryImportError::Directory(err) => {
                write!(f, "failed to store company listing: {}", err)
            }
        }
    }
}

impl std::error::Error for DirectoryImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DirectoryImportError::Io(err) => Some(err),
            DirectoryImportError::Csv(err) => Some(err),
            DirectoryImportError::Row { .. } => None,
            DirectoryImportError::Directory(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for DirectoryImportError {
    fn from(err: std::io::Error) -> Self {
        DirectoryImportError::Io(err)
    }
}

impl From<csv::Error> for DirectoryImportError {
    fn from(err: csv::Error) -> Self {
        DirectoryImportError::Csv(err)
    }
}

impl From<DirectoryError> for DirectoryImportError {
    fn from(err: DirectoryError) -> Self {
        DirectoryImportError::Directory(err)
    }
}

/// Loads a company export from disk. Returns the number of listings stored.
pub fn load_directory_file(
    path: impl AsRef<Path>,
    directory: &InMemoryCompanyDirectory,
) -> Result<usize, DirectoryImportError> {
    let file = File::open(path.as_ref())?;
    let loaded = load_directory(file, directory)?;
    info!(path = %path.as_ref().display(), loaded, "company directory imported");
    Ok(loaded)
}

/// Reads company rows and upserts them into `directory`.
///
/// List columns (`categories`, `postal_codes`) are `;`-separated. A row with `radius_km` set
/// serves a radius around `latitude`/`longitude`; otherwise it serves its postal codes.
pub fn load_directory<R: Read>(
    reader: R,
    directory: &InMemoryCompanyDirectory,
) -> Result<usize, DirectoryImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut loaded = 0;
    for (index, record) in csv_reader.deserialize::<CompanyRow>().enumerate() {
        let line = index + 2;
        let row = record?;
        let (company, contact) = row
            .into_listing()
            .map_err(|reason| DirectoryImportError::Row { line, reason })?;
        directory.upsert(company, contact)?;
        loaded += 1;
    }

    Ok(loaded)
}

#[derive(Debug, Deserialize)]
struct CompanyRow {
    id: String,
    tenant_id: String,
    name: String,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    categories: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    postal_codes: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    radius_km: Option<f64>,
    #[serde(default)]
    company_score: Option<u8>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    contact_channel: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    contact_recipient: Option<String>,
}

impl CompanyRow {
    fn into_listing(self) -> Result<(Company, Option<CompanyContact>), String> {
        if self.id.is_empty() || self.tenant_id.is_empty() {
            return Err("id and tenant_id are required".to_string());
        }

        let categories = split_list(self.categories.as_deref());
        if categories.is_empty() {
            return Err("at least one category is required".to_string());
        }
        if self.company_score.is_some_and(|score| score > 100) {
            return Err("company_score must be within 0..=100".to_string());
        }

        let postal_codes = split_list(self.postal_codes.as_deref());
        let service_area = match self.radius_km {
            Some(radius_km) => {
                let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) else {
                    return Err("radius service areas need latitude and longitude".to_string());
                };
                if !(radius_km.is_finite() && radius_km > 0.0) {
                    return Err("radius_km must be positive".to_string());
                }
                let Some(home_postal_code) = postal_codes.into_iter().next() else {
                    return Err("radius service areas need a home postal code".to_string());
                };
                ServiceArea::Radius {
                    home_postal_code,
                    center: GeoPoint {
                        latitude,
                        longitude,
                    },
                    radius_km,
                }
            }
            None if postal_codes.is_empty() => {
                return Err("postal_codes or radius_km is required".to_string());
            }
            None => ServiceArea::PostalCodes {
                codes: postal_codes,
            },
        };

        let contact = match (self.contact_channel.as_deref(), self.contact_recipient) {
            (_, None) => None,
            (channel, Some(recipient)) => Some(CompanyContact {
                channel: parse_channel(channel)?,
                recipient,
                display_name: self.name.clone(),
            }),
        };

        let company = Company {
            id: CompanyId(self.id),
            tenant_id: TenantId(self.tenant_id),
            name: self.name,
            active: self.active.unwrap_or(true),
            categories,
            service_area,
            company_score: self.company_score,
        };
        Ok((company, contact))
    }
}

fn parse_channel(value: Option<&str>) -> Result<ContactChannel, String> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        None | Some("email") => Ok(ContactChannel::Email),
        Some("sms") => Ok(ContactChannel::Sms),
        Some(other) => Err(format!("unknown contact channel '{other}'")),
    }
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
