//! Tracking URLs and beacon handling.
//!
//! Every served ad carries three beacon URLs:
//! - `{base}/v1/imp` fires when the ad renders
//! - `{base}/v1/view` fires when it becomes viewable
//! - `{base}/v1/click` records the click and redirects to the advertiser
//!
//! Query parameters: `id` impression id, `li` line item, `c` creative,
//! `u` user, `p` platform, `co` country, `sec` section, `au` ad-unit code,
//! plus `url` (the click-through target) on click URLs.

use std::sync::Arc;

use url::form_urlencoded;

use crate::context::RequestContext;
use crate::telemetry::EventRecorder;
use crate::types::{now_ms, Event, EventType, TrackingUrls};

/// 1x1 transparent GIF.
pub const PIXEL_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0xff, 0xff,
    0xff, 0x00, 0x00, 0x00, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

pub const PIXEL_CONTENT_TYPE: &str = "image/gif";

/// Headers sent with every pixel response.
pub const NO_CACHE_HEADERS: [(&str, &str); 3] = [
    ("Cache-Control", "no-store, no-cache, must-revalidate, private"),
    ("Pragma", "no-cache"),
    ("Expires", "0"),
];

/// Values stamped into one ad's beacon URLs.
#[derive(Debug, Clone, Copy)]
pub struct BeaconParams<'a> {
    pub impression_id: &'a str,
    pub line_item_id: i64,
    pub creative_id: i64,
    pub user_id: &'a str,
    pub platform: &'a str,
    pub country: &'a str,
    pub section: &'a str,
    pub ad_unit: &'a str,
}

// ================================================================================================
// URL BUILDER
// ================================================================================================

#[derive(Debug, Clone)]
pub struct TrackingUrlBuilder {
    base: String,
}

impl TrackingUrlBuilder {
    /// `base_url` is scheme and host, e.g. `https://ads.example.com`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base: String = base_url.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn build(&self, params: &BeaconParams<'_>, click_through: &str) -> TrackingUrls {
        TrackingUrls {
            impression: self.url(EventType::Impression, params, None),
            viewable: self.url(EventType::Viewable, params, None),
            click: self.url(EventType::Click, params, Some(click_through)),
        }
    }

    fn url(&self, kind: EventType, params: &BeaconParams<'_>, click_through: Option<&str>) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("id", params.impression_id)
            .append_pair("li", &params.line_item_id.to_string())
            .append_pair("c", &params.creative_id.to_string())
            .append_pair("u", params.user_id)
            .append_pair("p", params.platform)
            .append_pair("co", params.country)
            .append_pair("sec", params.section)
            .append_pair("au", params.ad_unit);
        if let Some(target) = click_through {
            query.append_pair("url", target);
        }
        format!("{}/v1/{}?{}", self.base, path_segment(kind), query.finish())
    }
}

fn path_segment(kind: EventType) -> &'static str {
    match kind {
        EventType::Impression => "imp",
        EventType::Viewable => "view",
        EventType::Click => "click",
    }
}

// ================================================================================================
// BEACON HANDLING
// ================================================================================================

/// What the HTTP layer should send back for a beacon hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingResponse {
    /// 200 with [`PIXEL_GIF`] and [`NO_CACHE_HEADERS`]
    Pixel,
    /// 302 to the decoded click-through target
    Redirect(String),
    /// 200 with an empty body
    Ok,
    /// 400 with a reason
    BadRequest(String),
}

impl TrackingResponse {
    pub fn status_code(&self) -> u16 {
        match self {
            TrackingResponse::Pixel | TrackingResponse::Ok => 200,
            TrackingResponse::Redirect(_) => 302,
            TrackingResponse::BadRequest(_) => 400,
        }
    }
}

/// Beacon query decoded into an event plus the optional click target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBeacon {
    pub event: Event,
    pub redirect: Option<String>,
}

/// Decodes a raw beacon query string.
pub fn parse_beacon(kind: EventType, query: &str) -> Result<ParsedBeacon, String> {
    let mut event = Event {
        event_type: kind,
        impression_id: String::new(),
        line_item_id: 0,
        creative_id: 0,
        user_id: String::new(),
        country: String::new(),
        platform: String::new(),
        ad_unit: String::new(),
        section: String::new(),
        created_at: now_ms(),
    };
    let mut redirect = None;

    for (key, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
        match key.as_ref() {
            "id" => event.impression_id = value.into_owned(),
            "li" => event.line_item_id = value.parse().unwrap_or(0),
            "c" => event.creative_id = value.parse().unwrap_or(0),
            "u" => event.user_id = value.into_owned(),
            "p" => event.platform = value.into_owned(),
            "co" => event.country = value.into_owned(),
            "sec" => event.section = value.into_owned(),
            "au" => event.ad_unit = value.into_owned(),
            "url" if !value.is_empty() => redirect = Some(value.into_owned()),
            _ => {}
        }
    }

    if event.impression_id.is_empty() {
        return Err("missing impression id".to_string());
    }
    if event.line_item_id <= 0 {
        return Err("missing or invalid line item id".to_string());
    }

    Ok(ParsedBeacon { event, redirect })
}

/// Turns beacon hits into recorded events.
pub struct TrackingService {
    recorder: Arc<EventRecorder>,
}

impl TrackingService {
    pub fn new(recorder: Arc<EventRecorder>) -> Self {
        Self { recorder }
    }

    pub fn recorder(&self) -> &Arc<EventRecorder> {
        &self.recorder
    }

    /// Validates the query and records the event. A store failure never
    /// changes the response.
    pub fn handle(&self, kind: EventType, query: &str, ctx: &RequestContext) -> TrackingResponse {
        let beacon = match parse_beacon(kind, query) {
            Ok(beacon) => beacon,
            Err(reason) => return TrackingResponse::BadRequest(reason),
        };

        self.recorder.record(ctx, &beacon.event);

        match (kind, beacon.redirect) {
            (EventType::Click, Some(target)) => TrackingResponse::Redirect(target),
            (EventType::Click, None) => TrackingResponse::Ok,
            _ => TrackingResponse::Pixel,
        }
    }
}
