use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for inbound leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeadId(pub String);

/// Identifier wrapper for directory listings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompanyId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssignmentId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// WGS84 coordinate resolved from the geography reference data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    /// Great-circle distance (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * Self::EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// Lifecycle of a lead from intake to outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Qualified,
    Assigned,
    Dispatched,
    Won,
    Lost,
    Spam,
}

impl LeadStatus {
    pub const fn label(self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Assigned => "assigned",
            LeadStatus::Dispatched => "dispatched",
            LeadStatus::Won => "won",
            LeadStatus::Lost => "lost",
            LeadStatus::Spam => "spam",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, LeadStatus::Won | LeadStatus::Lost | LeadStatus::Spam)
    }

    /// Forward edges the engine may take on its own.
    pub const fn advances_to(self, next: LeadStatus) -> bool {
        matches!(
            (self, next),
            (LeadStatus::New, LeadStatus::Qualified)
                | (LeadStatus::Qualified, LeadStatus::Assigned)
                | (LeadStatus::Assigned, LeadStatus::Dispatched)
                | (LeadStatus::Dispatched, LeadStatus::Won)
                | (LeadStatus::Dispatched, LeadStatus::Lost)
        )
    }

    /// Edges an operator may request directly. `assigned` and `dispatched` are only reachable
    /// through qualification and dispatch because they depend on assignment rows.
    pub const fn admin_may_set(self, next: LeadStatus) -> bool {
        match next {
            LeadStatus::Spam => !matches!(self, LeadStatus::Spam),
            LeadStatus::Qualified | LeadStatus::Won | LeadStatus::Lost => self.advances_to(next),
            LeadStatus::New | LeadStatus::Assigned | LeadStatus::Dispatched => false,
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A customer inquiry requesting a service in a category and location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub tenant_id: TenantId,
    pub category_id: String,
    pub postal_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Intake payload accepted from the public form or partner integrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLead {
    pub tenant_id: TenantId,
    pub category_id: String,
    pub postal_code: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Geography a company has declared it serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceArea {
    /// Explicit postal codes; the first entry is the company's home base.
    PostalCodes { codes: Vec<String> },
    /// Everything within `radius_km` of `center`. Leads without a resolved location fall back to
    /// matching `home_postal_code`.
    Radius {
        home_postal_code: String,
        center: GeoPoint,
        radius_km: f64,
    },
}

/// Directory listing eligible to receive leads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub tenant_id: TenantId,
    pub name: String,
    pub active: bool,
    pub categories: Vec<String>,
    pub service_area: ServiceArea,
    /// Longitudinal performance score on 0..=100, maintained outside the engine.
    #[serde(default)]
    pub company_score: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactChannel {
    Email,
    Sms,
}

/// Resolved contact used to notify a company about a lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyContact {
    pub channel: ContactChannel,
    pub recipient: String,
    pub display_name: String,
}

/// Status of one (lead, company) match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Sent,
    Dispatching,
    Notified,
    Failed,
    Declined,
    Expired,
}

impl AssignmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            AssignmentStatus::Sent => "sent",
            AssignmentStatus::Dispatching => "dispatching",
            AssignmentStatus::Notified => "notified",
            AssignmentStatus::Failed => "failed",
            AssignmentStatus::Declined => "declined",
            AssignmentStatus::Expired => "expired",
        }
    }

    /// Legal compare-and-swap edges. `dispatching → sent` is the stale-claim reclaim and
    /// `failed → sent` the manual retry.
    pub const fn allows(self, next: AssignmentStatus) -> bool {
        matches!(
            (self, next),
            (AssignmentStatus::Sent, AssignmentStatus::Dispatching)
                | (AssignmentStatus::Sent, AssignmentStatus::Expired)
                | (AssignmentStatus::Dispatching, AssignmentStatus::Notified)
                | (AssignmentStatus::Dispatching, AssignmentStatus::Failed)
                | (AssignmentStatus::Dispatching, AssignmentStatus::Sent)
                | (AssignmentStatus::Failed, AssignmentStatus::Sent)
                | (AssignmentStatus::Notified, AssignmentStatus::Declined)
                | (AssignmentStatus::Notified, AssignmentStatus::Expired)
        )
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The recorded match between one lead and one company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub lead_id: LeadId,
    pub company_id: CompanyId,
    pub score: u8,
    pub rank: u16,
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

/// Who requested a lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    System,
    Admin { id: String },
}

impl Actor {
    pub fn admin(id: impl Into<String>) -> Self {
        Actor::Admin { id: id.into() }
    }

    pub fn label(&self) -> String {
        match self {
            Actor::System => "system".to_string(),
            Actor::Admin { id } => format!("admin:{id}"),
        }
    }
}
