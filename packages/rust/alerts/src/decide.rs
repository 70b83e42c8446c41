//! Which changes deserve a notification, and what it says.

use radar_shared::{AlertConfig, ChangeKind, ClassificationResult, Company};

/// Subject and body of a notification, ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Decide whether a freshly persisted classification warrants an alert.
///
/// `prior` is the classification that was replaced, `None` for a company seen
/// for the first time. A new company is reported as `New` even when a tier
/// comparison would also apply.
pub fn decide(
    prior: Option<&ClassificationResult>,
    new: &ClassificationResult,
    config: &AlertConfig,
) -> Option<ChangeKind> {
    if !config.enabled {
        return None;
    }

    let Some(prior) = prior else {
        return (new.tier >= config.min_tier).then_some(ChangeKind::New);
    };

    if new.tier > prior.tier {
        (new.tier >= config.min_tier).then_some(ChangeKind::Upgraded)
    } else if new.tier < prior.tier {
        (prior.tier >= config.min_tier).then_some(ChangeKind::Downgraded)
    } else if config.notify_reanalysis {
        Some(ChangeKind::Reanalyzed)
    } else {
        None
    }
}

/// Render the notification for `kind`.
pub fn render(
    kind: ChangeKind,
    company: &Company,
    prior: Option<&ClassificationResult>,
    new: &ClassificationResult,
    config: &AlertConfig,
) -> RenderedMessage {
    let headline = match (kind, prior) {
        (ChangeKind::New, _) => format!("new company rated {}", new.tier.title()),
        (ChangeKind::Upgraded, Some(p)) => {
            format!("upgraded from {} to {}", p.tier.title(), new.tier.title())
        }
        (ChangeKind::Downgraded, Some(p)) => {
            format!("downgraded from {} to {}", p.tier.title(), new.tier.title())
        }
        (ChangeKind::Upgraded | ChangeKind::Downgraded, None) => {
            format!("now rated {}", new.tier.title())
        }
        (ChangeKind::Reanalyzed, _) => {
            format!("website changed, still rated {}", new.tier.title())
        }
    };

    let subject = format!("[{}] {}: {}", config.radar_name, company.name, headline);

    let mut body = String::new();
    body.push_str(&format!("{} ({})\n", company.name, company.website));
    body.push_str(&format!("Address: {}\n", company.address));
    if let Some(industry) = &company.industry {
        body.push_str(&format!("Industry: {industry}\n"));
    }
    body.push('\n');
    body.push_str(&format!("{} maturity: {}\n", config.topic, new.tier.title()));
    if let Some(prior) = prior {
        if prior.tier != new.tier {
            body.push_str(&format!("Previously: {}\n", prior.tier.title()));
        }
    }
    if let Some(confidence) = new.confidence {
        body.push_str(&format!("Confidence: {confidence}%\n"));
    }
    if !new.applications.is_empty() {
        body.push_str(&format!("Applications: {}\n", new.applications.join(", ")));
    }
    body.push_str(&format!("\nRationale: {}\n", new.rationale));
    body.push_str(&format!("\n{}\n", new.biography));

    RenderedMessage { subject, body }
}
