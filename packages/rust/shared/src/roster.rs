//! Roster loading.
//!
//! A roster is a TOML file with one `[[companies]]` table per company:
//!
//! ```toml
//! [[companies]]
//! name = "Acme Robotics GmbH"
//! website = "https://www.acme-robotics.de"
//! address = "Industriestraße 4, 22926 Ahrensburg"
//! industry = "Maschinenbau"
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::error::{RadarError, Result};
use crate::types::{Company, CompanyId};

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    companies: Vec<RosterEntry>,
}

#[derive(Debug, Deserialize)]
struct RosterEntry {
    id: Option<String>,
    name: String,
    website: String,
    #[serde(default)]
    address: String,
    industry: Option<String>,
    region: Option<String>,
}

/// Load and validate a roster file.
pub fn load_roster(path: &Path) -> Result<Vec<Company>> {
    let content = std::fs::read_to_string(path).map_err(|e| RadarError::io(path, e))?;
    parse_roster(&content)
        .map_err(|e| RadarError::validation(format!("roster {}: {e}", path.display())))
}

/// Parse roster TOML. Entries must have a name and an http(s) website, and
/// identities must be unique.
pub fn parse_roster(content: &str) -> Result<Vec<Company>> {
    let file: RosterFile =
        toml::from_str(content).map_err(|e| RadarError::validation(e.to_string()))?;

    let mut seen = HashSet::new();
    let mut companies = Vec::with_capacity(file.companies.len());

    for (index, entry) in file.companies.into_iter().enumerate() {
        let company = entry.into_company().map_err(|e| {
            RadarError::validation(format!("entry #{}: {e}", index + 1))
        })?;
        if !seen.insert(company.id.clone()) {
            return Err(RadarError::validation(format!(
                "duplicate company id '{}'",
                company.id
            )));
        }
        companies.push(company);
    }

    Ok(companies)
}

impl RosterEntry {
    fn into_company(self) -> Result<Company> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(RadarError::validation("name must not be empty"));
        }

        let raw = self.website.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{raw}")
        };
        let website = Url::parse(&with_scheme)
            .map_err(|e| RadarError::validation(format!("invalid website '{raw}': {e}")))?;
        if !matches!(website.scheme(), "http" | "https") {
            return Err(RadarError::validation(format!(
                "website must be http(s): {website}"
            )));
        }

        let id = match self.id {
            Some(id) => CompanyId::new(id)?,
            None => CompanyId::from_website(&website)?,
        };

        Ok(Company {
            id,
            name,
            website,
            address: self.address.trim().to_string(),
            industry: self.industry.filter(|s| !s.trim().is_empty()),
            region: self.region.filter(|s| !s.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_and_derives_ids() {
        let roster = parse_roster(
            r#"
[[companies]]
name = "Acme Robotics GmbH"
website = "www.acme-robotics.de"
address = "Industriestraße 4, 22926 Ahrensburg"

[[companies]]
id = "stormarn-042"
name = "Bargteheide Logistik"
website = "https://logistik.example/"
industry = ""
"#,
        )
        .expect("parse");

        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].id.as_str(), "acme-robotics.de");
        assert_eq!(roster[0].website.as_str(), "https://www.acme-robotics.de/");
        assert_eq!(roster[1].id.as_str(), "stormarn-042");
        assert_eq!(roster[1].industry, None);
    }

    #[test]
    fn rejects_duplicates_and_bad_entries() {
        let dup = parse_roster(
            r#"
[[companies]]
name = "A"
website = "https://a.example"

[[companies]]
name = "A again"
website = "https://www.a.example/"
"#,
        );
        assert!(dup.unwrap_err().to_string().contains("duplicate"));

        let blank = parse_roster(
            r#"
[[companies]]
name = "  "
website = "https://a.example"
"#,
        );
        assert!(blank.is_err());

        let ftp = parse_roster(
            r#"
[[companies]]
name = "B"
website = "ftp://b.example"
"#,
        );
        assert!(ftp.is_err());
    }

    #[test]
    fn empty_roster_is_ok() {
        assert!(parse_roster("").expect("parse").is_empty());
    }
}
