use super::super::domain::{Company, Lead, ServiceArea};
use super::config::ScoringConfig;
use super::{Exclusion, ScoreComponent, ScoreFactor};

/// Share of the proximity weight granted for a listed postal code that is not the home base.
const SECONDARY_POSTAL_PERCENT: u32 = 70;
/// Share of the category weight granted when only a parent or child category overlaps.
const PARTIAL_CATEGORY_PERCENT: u32 = 50;
/// Performance value assumed when a company has no history yet.
pub(crate) const NEUTRAL_COMPANY_SCORE: u8 = 50;

pub(crate) fn score_company(
    lead: &Lead,
    company: &Company,
    config: &ScoringConfig,
) -> Result<Vec<ScoreComponent>, Exclusion> {
    if !company.active {
        return Err(Exclusion::Inactive);
    }
    if company.tenant_id != lead.tenant_id {
        return Err(Exclusion::OtherTenant);
    }

    let category = category_component(lead, company, config.category_weight)?;
    let proximity = proximity_component(lead, company, config.proximity_weight)?;
    let performance = performance_component(company, config.performance_weight);

    Ok(vec![category, proximity, performance])
}

fn category_component(
    lead: &Lead,
    company: &Company,
    weight: u8,
) -> Result<ScoreComponent, Exclusion> {
    let wanted = normalize_category(&lead.category_id);
    let mut best: Option<(u32, &str)> = None;

    for served in &company.categories {
        let served_norm = normalize_category(served);
        let percent = if served_norm == wanted {
            100
        } else if is_ancestor(&served_norm, &wanted) || is_ancestor(&wanted, &served_norm) {
            PARTIAL_CATEGORY_PERCENT
        } else {
            continue;
        };

        if best.map_or(true, |(current, _)| percent > current) {
            best = Some((percent, served.as_str()));
        }
    }

    let (percent, served) = best.ok_or(Exclusion::CategoryNotServed)?;
    let notes = if percent == 100 {
        format!("serves {}", lead.category_id)
    } else {
        format!("partial overlap via {served}")
    };

    Ok(ScoreComponent {
        factor: ScoreFactor::Category,
        points: weighted(weight, percent),
        notes,
    })
}

fn proximity_component(
    lead: &Lead,
    company: &Company,
    weight: u8,
) -> Result<ScoreComponent, Exclusion> {
    let postal = normalize_postal(&lead.postal_code);

    let (percent, notes) = match &company.service_area {
        ServiceArea::PostalCodes { codes } => {
            let position = codes
                .iter()
                .position(|code| normalize_postal(code) == postal)
                .ok_or(Exclusion::OutsideServiceArea)?;
            if position == 0 {
                (100, format!("home postal code {}", lead.postal_code))
            } else {
                (
                    SECONDARY_POSTAL_PERCENT,
                    format!("serves postal code {}", lead.postal_code),
                )
            }
        }
        ServiceArea::Radius {
            home_postal_code,
            center,
            radius_km,
        } => match lead.location {
            Some(location) => {
                let distance = center.distance_km(&location);
                if radius_km.is_nan() || *radius_km <= 0.0 || distance > *radius_km {
                    return Err(Exclusion::OutsideServiceArea);
                }
                let percent = (((radius_km - distance) / radius_km) * 100.0)
                    .round()
                    .clamp(0.0, 100.0) as u32;
                (
                    percent,
                    format!("{distance:.1} km from base within {radius_km:.0} km radius"),
                )
            }
            None if normalize_postal(home_postal_code) == postal => (
                100,
                format!("home postal code {} (no coordinates)", lead.postal_code),
            ),
            None => return Err(Exclusion::OutsideServiceArea),
        },
    };

    Ok(ScoreComponent {
        factor: ScoreFactor::Proximity,
        points: weighted(weight, percent),
        notes,
    })
}

fn performance_component(company: &Company, weight: u8) -> ScoreComponent {
    match company.company_score {
        Some(score) => {
            let score = score.min(100);
            ScoreComponent {
                factor: ScoreFactor::Performance,
                points: weighted(weight, u32::from(score)),
                notes: format!("company score {score}"),
            }
        }
        None => ScoreComponent {
            factor: ScoreFactor::Performance,
            points: weighted(weight, u32::from(NEUTRAL_COMPANY_SCORE)),
            notes: "no performance history, neutral midpoint".to_string(),
        },
    }
}

/// Integer share of `weight`, rounded half-up so ties stay reproducible.
fn weighted(weight: u8, percent: u32) -> u8 {
    let percent = percent.min(100);
    ((u32::from(weight) * percent + 50) / 100) as u8
}

/// Category relation used by candidate selection: exact, parent or child category.
pub(crate) fn serves_category(company: &Company, category_id: &str) -> bool {
    let wanted = normalize_category(category_id);
    company.categories.iter().any(|served| {
        let served = normalize_category(served);
        served == wanted || is_ancestor(&served, &wanted) || is_ancestor(&wanted, &served)
    })
}

fn normalize_category(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

fn is_ancestor(parent: &str, child: &str) -> bool {
    child.len() > parent.len()
        && child.starts_with(parent)
        && child.as_bytes()[parent.len()] == b'.'
}

fn normalize_postal(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
