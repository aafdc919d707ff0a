//! Canned payloads for exercising the relay from the shell.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

pub fn crop_update() -> Value {
    json!({
        "crop_id": "crop_001",
        "crop_type": "wheat",
        "growth_stage": "flowering",
        "health_status": "healthy",
        "location": { "lat": 28.6139, "lng": 77.2090 },
        "updated_by": "farmer_001"
    })
}

/// Heavy-rain alert valid for 24 hours from `now`.
pub fn weather_alert(now: DateTime<Utc>) -> Value {
    json!({
        "alert_type": "heavy_rain",
        "severity": "high",
        "location": { "lat": 28.6139, "lng": 77.2090 },
        "message": "Heavy rainfall expected in the next 24 hours. Protect your crops.",
        "valid_until": (now + Duration::hours(24)).to_rfc3339()
    })
}
