use chrono::{Duration, Utc};
use pointcount::logging::{self, TracingSink};
use pointcount::tracker::MemoryTracker;
use pointcount::{
    Credentials, EstimationService, FieldDescriptor, FieldType, PointCountConfig, ReportRequest,
};
use rand::Rng;
use std::sync::Arc;

const QUERY: &str = "project = DEMO AND issuetype = Story";
const FIELD_ID: &str = "customfield_10016";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing();

    println!("pointcount - story point estimation sampler");
    println!("===========================================");

    let credentials = Credentials::new("demo@example.com", "demo-token", "demo");
    let tracker = MemoryTracker::new()
        .with_account(credentials.clone())
        .with_field(FieldDescriptor::new(FIELD_ID, "Story Points", FieldType::Number))
        .with_field(FieldDescriptor::new("summary", "Summary", FieldType::String));

    println!("Generating fake backlog...");
    let issue_count = seed_backlog(&tracker, 12 * 7);
    println!("Seeded {} issues over the last 12 weeks", issue_count);

    let service = EstimationService::new(
        Arc::new(tracker),
        PointCountConfig::from_env(),
        Arc::new(TracingSink),
    );

    service.check_credentials(&credentials).await?;
    println!("\nCredentials accepted for account '{}'", credentials.account_name);

    match service.validate_field(&credentials, "summary").await {
        Ok(_) => println!("Unexpectedly accepted 'summary' as an estimate field"),
        Err(e) => println!("Field check on 'summary': {}", e),
    }

    let request = ReportRequest {
        credentials,
        query: QUERY.to_string(),
        field: "Story Points".to_string(),
        frequency: "weekly".to_string(),
        period_count: serde_json::json!(8),
    };
    let report = service.compute_report(&request).await?;

    println!("\nWeekly totals for '{}' ({} periods):", report.query, report.len());
    for sample in &report.samples {
        println!(
            "  {} -> {}: {:>6.1} points across {:>3} issues",
            sample.period_start.format("%Y-%m-%d"),
            sample.period_end.format("%Y-%m-%d %H:%M"),
            sample.total,
            sample.issue_count
        );
    }

    println!("\nDemo completed successfully!");
    Ok(())
}

fn seed_backlog(tracker: &MemoryTracker, days: i64) -> usize {
    let mut rng = rand::thread_rng();
    let now = Utc::now();
    let estimates = [1.0, 2.0, 3.0, 5.0, 8.0, 13.0];
    let mut seeded = 0;

    for day in 0..days {
        let created = now - Duration::days(days - day);
        for _ in 0..rng.gen_range(0..4) {
            seeded += 1;
            // roughly one in five stories is never estimated
            let value = if rng.gen_bool(0.2) {
                None
            } else {
                Some(estimates[rng.gen_range(0..estimates.len())])
            };
            tracker.add_issue(QUERY, format!("DEMO-{}", seeded), created, value);
        }
    }

    seeded
}
