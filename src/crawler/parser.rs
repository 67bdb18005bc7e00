use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;

use crate::crawler::models::{Listing, PaginationInfo};

const SCRIPT_MARKER: &str = "<script id=\"__next_data__\"";
const SCRIPT_END_MARKER: &str = "</script>";

// ISO 4217 numeric codes the upstream price map is keyed by.
const CURRENCY_USD: i32 = 840;
const CURRENCY_BYN: i32 = 933;
const CURRENCY_EUR: i32 = 978;
const CURRENCY_RUB: i32 = 643;

/// Extracts the embedded page-state JSON from raw markup.
///
/// Marker matching is case-insensitive. Returns `None` when either marker is
/// missing or the enclosed span is blank; no JSON validation happens here.
pub fn extract_state_json(html: &str) -> Option<&str> {
    let lower = html.to_ascii_lowercase();
    let marker = lower.find(SCRIPT_MARKER)?;
    let content_start = marker + lower[marker..].find('>')? + 1;
    if content_start >= html.len() {
        return None;
    }
    let content_end = content_start + lower[content_start..].find(SCRIPT_END_MARKER)?;
    let span = &html[content_start..content_end];
    if span.trim().is_empty() {
        return None;
    }
    Some(span)
}

/// Decodes one listing-index page into its items and, when the payload has
/// one, its pagination block.
pub fn parse_listings_page(html: &str) -> Option<(Vec<Listing>, Option<PaginationInfo>)> {
    let root = parse_state(html, "listings page")?;
    let Some(listing_state) = initial_state(&root).and_then(|s| s.get("objectsListing")) else {
        warn!("unable to navigate to the objects listing in the state payload");
        return None;
    };
    let objects = listing_state.get("objects")?.as_array()?;

    let items = objects.iter().filter_map(decode_summary).collect();
    let pagination = listing_state.get("pagination").map(|p| PaginationInfo {
        page: get_i32(p, "page").unwrap_or(1),
        page_size: get_i32(p, "pageSize").unwrap_or(0),
        total_count: get_i32(p, "totalCount").unwrap_or(0),
    });

    Some((items, pagination))
}

/// Decodes one object (detail) page into a full listing record.
pub fn parse_object_page(html: &str) -> Option<Listing> {
    let root = parse_state(html, "object page")?;
    let node = match initial_state(&root)
        .and_then(|s| s.get("objectView"))
        .and_then(|v| v.get("object"))
    {
        Some(node) if node.is_object() => node,
        _ => {
            warn!("unable to navigate to the object node in the state payload");
            return None;
        }
    };
    Some(decode_object(node))
}

fn parse_state(html: &str, context: &'static str) -> Option<Value> {
    let Some(json) = extract_state_json(html) else {
        warn!(context, "state script block not found in the downloaded HTML");
        return None;
    };
    match serde_json::from_str(json) {
        Ok(root) => Some(root),
        Err(error) => {
            warn!(context, %error, "failed to parse the state JSON payload");
            None
        }
    }
}

fn initial_state(root: &Value) -> Option<&Value> {
    root.get("props")?.get("pageProps")?.get("initialState")
}

fn decode_summary(el: &Value) -> Option<Listing> {
    let mut listing = Listing {
        code: get_i32(el, "code"),
        title: get_string(el, "title"),
        description: get_string(el, "description"),
        headline: get_string(el, "headline"),
        area_total: get_f64(el, "areaTotal"),
        area_living: get_f64(el, "areaLiving"),
        rooms: get_i32(el, "rooms"),
        storey: get_i32(el, "storey"),
        storeys: get_i32(el, "storeys"),
        address: get_string(el, "address"),
        contact_name: get_string(el, "contactName"),
        contact_email: get_string(el, "contactEmail"),
        contact_phones: get_string_array(el, "contactPhones"),
        images: get_images(el),
        created_at: get_datetime(el, "createdAt"),
        updated_at: get_datetime(el, "updatedAt"),
        ..Listing::default()
    };
    listing.image_url = listing.images.first().cloned();
    decode_prices(el, &mut listing);

    listing.has_content().then_some(listing)
}

fn decode_object(el: &Value) -> Listing {
    let mut listing = Listing {
        code: get_i32(el, "code"),

        title: get_string(el, "title"),
        headline: get_string(el, "headline"),
        description: get_string(el, "description"),

        area_total: get_f64(el, "areaTotal"),
        area_living: get_f64(el, "areaLiving"),
        area_kitchen: get_f64(el, "areaKitchen"),

        rooms: get_i32(el, "rooms"),
        storey: get_i32(el, "storey"),
        storeys: get_i32(el, "storeys"),
        building_year: get_i32(el, "buildingYear"),
        overhaul_year: get_i32(el, "overhaulYear"),

        layout: get_string(el, "layout"),
        balcony_type: get_string(el, "balconyType"),
        repair_state: get_string(el, "repairState"),
        furniture: get_bool(el, "furniture"),
        toilet: get_string(el, "toilet"),

        prepayment: get_string(el, "prepayment"),
        housing_rent: get_string(el, "housingRent"),
        lease_period: get_string(el, "leasePeriod"),

        contact_name: get_string(el, "contactName"),
        contact_email: get_string(el, "contactEmail"),
        contact_phones: get_string_array(el, "contactPhones"),

        address: get_string(el, "address"),
        town_name: get_string(el, "townName"),
        town_district_name: get_string(el, "townDistrictName"),
        town_sub_district_name: get_string(el, "townSubDistrictName"),
        street_name: get_string(el, "streetName"),
        house_number: get_i32(el, "houseNumber"),
        building_number: get_string(el, "buildingNumber"),

        seller: get_string(el, "seller"),
        paid: get_bool(el, "paid"),
        views_count: get_i32(el, "viewsCount"),

        images: get_images(el),
        appliances: get_string_array(el, "appliances"),

        created_at: get_datetime(el, "createdAt"),
        updated_at: get_datetime(el, "updatedAt"),
        raise_date: get_datetime(el, "raiseDate"),
        new_again_date: get_datetime(el, "newAgainDate"),

        ..Listing::default()
    };
    listing.image_url = listing.images.first().cloned();
    decode_prices(el, &mut listing);
    decode_location(el, &mut listing);
    listing
}

fn decode_prices(el: &Value, listing: &mut Listing) {
    if let Some(rates) = el.get("priceRates").filter(|v| v.is_object()) {
        listing.price_usd = rate(rates, CURRENCY_USD);
        listing.price_byn = rate(rates, CURRENCY_BYN);
        listing.price_eur = rate(rates, CURRENCY_EUR);
        listing.price_rub = rate(rates, CURRENCY_RUB);
        return;
    }

    // Older payloads carry a single (price, priceCurrency) pair instead.
    let (Some(price), Some(currency)) = (get_decimal(el, "price"), get_i32(el, "priceCurrency"))
    else {
        return;
    };
    match currency {
        CURRENCY_USD => listing.price_usd = Some(price),
        CURRENCY_BYN => listing.price_byn = Some(price),
        CURRENCY_EUR => listing.price_eur = Some(price),
        CURRENCY_RUB => listing.price_rub = Some(price),
        _ => {}
    }
}

fn decode_location(el: &Value, listing: &mut Listing) {
    // Two-element [longitude, latitude] array; anything else leaves both unset.
    let Some(pair) = el.get("location").and_then(Value::as_array) else {
        return;
    };
    if let [lon, lat] = pair.as_slice() {
        if let (Some(lon), Some(lat)) = (lon.as_f64(), lat.as_f64()) {
            listing.longitude = Some(lon);
            listing.latitude = Some(lat);
        }
    }
}

fn normalize(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn get_string(el: &Value, name: &str) -> Option<String> {
    match el.get(name)? {
        Value::Null => None,
        Value::String(s) => normalize(s),
        other => normalize(&other.to_string()),
    }
}

fn get_i32(el: &Value, name: &str) -> Option<i32> {
    match el.get(name)? {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn get_f64(el: &Value, name: &str) -> Option<f64> {
    match el.get(name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn get_bool(el: &Value, name: &str) -> Option<bool> {
    match el.get(name)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("true") {
                Some(true)
            } else if s.eq_ignore_ascii_case("false") {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn get_decimal(el: &Value, name: &str) -> Option<Decimal> {
    decimal_value(el.get(name)?)
}

fn rate(rates: &Value, currency: i32) -> Option<Decimal> {
    decimal_value(rates.get(currency.to_string())?)
}

fn decimal_value(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn get_datetime(el: &Value, name: &str) -> Option<DateTime<Utc>> {
    let raw = el.get(name)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn get_string_array(el: &Value, name: &str) -> Vec<String> {
    el.get(name)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .filter_map(normalize)
                .collect()
        })
        .unwrap_or_default()
}

fn get_images(el: &Value) -> Vec<String> {
    // The object page carries "slides"; index items fall back to "images".
    let slides = get_string_array(el, "slides");
    if !slides.is_empty() {
        return slides;
    }
    get_string_array(el, "images")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn page_markup(state: &Value) -> String {
        format!(
            "<html><head><script id=\"__NEXT_DATA__\" type=\"application/json\">{state}</script></head><body></body></html>"
        )
    }

    fn listings_state(objects: Value, pagination: Option<Value>) -> Value {
        let mut listing = json!({ "objects": objects });
        if let Some(p) = pagination {
            listing["pagination"] = p;
        }
        json!({ "props": { "pageProps": { "initialState": { "objectsListing": listing } } } })
    }

    fn object_state(object: Value) -> Value {
        json!({ "props": { "pageProps": { "initialState": { "objectView": { "object": object } } } } })
    }

    #[test]
    fn extracts_state_between_markers() {
        let html = "<script id=\"__NEXT_DATA__\" type=\"application/json\">{\"a\":1}</script>";
        assert_eq!(extract_state_json(html), Some("{\"a\":1}"));
    }

    #[test]
    fn extraction_marker_match_is_case_insensitive() {
        let html = "<SCRIPT ID=\"__next_data__\">{}</SCRIPT>";
        assert_eq!(extract_state_json(html), Some("{}"));
    }

    #[test]
    fn extraction_fails_without_markers() {
        assert_eq!(extract_state_json("<html><body>no state</body></html>"), None);
        // opening marker but no closing tag
        assert_eq!(
            extract_state_json("<script id=\"__NEXT_DATA__\">{\"a\":1}"),
            None
        );
        // closing tag only before the opening marker
        assert_eq!(
            extract_state_json("</script><script id=\"__NEXT_DATA__\">{\"a\":1}"),
            None
        );
    }

    #[test]
    fn extraction_rejects_blank_spans() {
        assert_eq!(
            extract_state_json("<script id=\"__NEXT_DATA__\"></script>"),
            None
        );
        assert_eq!(
            extract_state_json("<script id=\"__NEXT_DATA__\">   \n</script>"),
            None
        );
    }

    #[test]
    fn numeric_strings_decode_like_numbers() {
        let as_string = object_state(json!({ "code": "123", "areaTotal": "45.5",
            "priceRates": { "840": "123.45" } }));
        let as_number = object_state(json!({ "code": 123, "areaTotal": 45.5,
            "priceRates": { "840": 123.45 } }));

        let a = parse_object_page(&page_markup(&as_string)).unwrap();
        let b = parse_object_page(&page_markup(&as_number)).unwrap();

        assert_eq!(a.code, b.code);
        assert_eq!(a.area_total, b.area_total);
        assert_eq!(a.price_usd, b.price_usd);
        assert_eq!(a.price_usd, Some(Decimal::new(12_345, 2)));
    }

    #[test]
    fn blank_strings_decode_to_absent() {
        let state = object_state(json!({
            "code": 1,
            "title": "   ",
            "description": "  padded  ",
            "rooms": "not a number",
            "furniture": "yes"
        }));
        let listing = parse_object_page(&page_markup(&state)).unwrap();

        assert_eq!(listing.title, None);
        assert_eq!(listing.description.as_deref(), Some("padded"));
        assert_eq!(listing.rooms, None);
        assert_eq!(listing.furniture, None);
    }

    #[test]
    fn bool_literal_strings_are_accepted() {
        let state = object_state(json!({ "code": 1, "furniture": "True", "paid": false }));
        let listing = parse_object_page(&page_markup(&state)).unwrap();

        assert_eq!(listing.furniture, Some(true));
        assert_eq!(listing.paid, Some(false));
    }

    #[test]
    fn dates_normalize_to_utc() {
        let state = object_state(json!({
            "code": 1,
            "createdAt": "2024-05-01T12:00:00+03:00",
            "updatedAt": "not a date"
        }));
        let listing = parse_object_page(&page_markup(&state)).unwrap();

        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        assert_eq!(listing.created_at, Some(expected));
        assert_eq!(listing.updated_at, None);
    }

    #[test]
    fn currency_map_routes_each_code() {
        let state = object_state(json!({
            "code": 1,
            "priceRates": { "840": 100, "933": 320.5, "978": "95", "643": 9100 }
        }));
        let listing = parse_object_page(&page_markup(&state)).unwrap();

        assert_eq!(listing.price_usd, Some(Decimal::new(100, 0)));
        assert_eq!(listing.price_byn, Some(Decimal::new(3205, 1)));
        assert_eq!(listing.price_eur, Some(Decimal::new(95, 0)));
        assert_eq!(listing.price_rub, Some(Decimal::new(9100, 0)));
    }

    #[test]
    fn price_pair_fallback_routes_to_matching_currency() {
        let state = object_state(json!({ "code": 1, "price": 450.0, "priceCurrency": 978 }));
        let listing = parse_object_page(&page_markup(&state)).unwrap();

        assert_eq!(listing.price_eur, Some(Decimal::new(450, 0)));
        assert_eq!(listing.price_usd, None);
    }

    #[test]
    fn location_pair_maps_to_lon_lat() {
        let good = object_state(json!({ "code": 1, "location": [27.56, 53.9] }));
        let listing = parse_object_page(&page_markup(&good)).unwrap();
        assert_eq!(listing.longitude, Some(27.56));
        assert_eq!(listing.latitude, Some(53.9));

        let bad = object_state(json!({ "code": 1, "location": [27.56] }));
        let listing = parse_object_page(&page_markup(&bad)).unwrap();
        assert_eq!(listing.longitude, None);
        assert_eq!(listing.latitude, None);
    }

    #[test]
    fn slides_take_priority_over_images() {
        let state = object_state(json!({
            "code": 1,
            "slides": ["s1.jpg", "  ", "s2.jpg"],
            "images": ["i1.jpg"]
        }));
        let listing = parse_object_page(&page_markup(&state)).unwrap();

        assert_eq!(listing.images, vec!["s1.jpg", "s2.jpg"]);
        assert_eq!(listing.image_url.as_deref(), Some("s1.jpg"));

        let fallback = object_state(json!({ "code": 1, "slides": [], "images": ["i1.jpg", 7] }));
        let listing = parse_object_page(&page_markup(&fallback)).unwrap();
        assert_eq!(listing.images, vec!["i1.jpg"]);
    }

    #[test]
    fn listing_page_drops_empty_items_and_reads_pagination() {
        let state = listings_state(
            json!([
                { "code": 1, "title": "flat one" },
                { "code": 2 },
                { "code": 3, "priceRates": { "933": 700 } }
            ]),
            Some(json!({ "page": 2, "pageSize": 30, "totalCount": 150 })),
        );
        let (items, pagination) = parse_listings_page(&page_markup(&state)).unwrap();

        let codes: Vec<_> = items.iter().filter_map(|i| i.code).collect();
        assert_eq!(codes, vec![1, 3]);
        assert_eq!(
            pagination,
            Some(PaginationInfo { page: 2, page_size: 30, total_count: 150 })
        );
    }

    #[test]
    fn listing_page_without_pagination_block() {
        let state = listings_state(json!([{ "code": 9, "title": "t" }]), None);
        let (items, pagination) = parse_listings_page(&page_markup(&state)).unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(pagination, None);
    }

    #[test]
    fn malformed_json_yields_nothing() {
        let html = "<script id=\"__NEXT_DATA__\">{not json}</script>";
        assert!(parse_listings_page(html).is_none());
        assert!(parse_object_page(html).is_none());
    }

    #[test]
    fn object_page_requires_the_object_node() {
        let state = json!({ "props": { "pageProps": { "initialState": {} } } });
        assert!(parse_object_page(&page_markup(&state)).is_none());
    }
}
