use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

/// Pagination metadata of one listing-index response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationInfo {
    pub page: i32,
    pub page_size: i32,
    pub total_count: i32,
}

impl PaginationInfo {
    /// Fallback for feeds without a pagination block: the page is assumed to
    /// cover the whole result set.
    pub fn covering(item_count: usize) -> Self {
        Self {
            page: 1,
            page_size: item_count as i32,
            total_count: item_count as i32,
        }
    }
}

/// One decoded listing-index page.
#[derive(Debug, Clone)]
pub struct ListingsPage {
    pub items: Vec<Listing>,
    pub pagination: PaginationInfo,
}

/// One property record. The listing-index decode populates a subset of the
/// fields (enough to harvest codes), the object-page decode fills everything.
///
/// `code` is the upstream site's identifier and the reconciliation key;
/// `id` is assigned by storage and never derived from `code`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, FromRow)]
pub struct Listing {
    pub id: Option<i64>,
    pub code: Option<i32>,

    pub title: Option<String>,
    pub description: Option<String>,
    pub headline: Option<String>,

    pub area_total: Option<f64>,
    pub area_living: Option<f64>,
    pub area_kitchen: Option<f64>,

    pub rooms: Option<i32>,
    pub storey: Option<i32>,
    pub storeys: Option<i32>,
    pub building_year: Option<i32>,
    pub overhaul_year: Option<i32>,

    pub layout: Option<String>,
    pub balcony_type: Option<String>,
    pub repair_state: Option<String>,
    pub furniture: Option<bool>,
    pub toilet: Option<String>,

    pub prepayment: Option<String>,
    pub housing_rent: Option<String>,
    pub lease_period: Option<String>,

    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phones: Vec<String>,

    pub address: Option<String>,
    pub town_name: Option<String>,
    pub town_district_name: Option<String>,
    pub town_sub_district_name: Option<String>,
    pub street_name: Option<String>,
    pub house_number: Option<i32>,
    pub building_number: Option<String>,

    pub seller: Option<String>,
    pub paid: Option<bool>,
    pub views_count: Option<i32>,

    pub longitude: Option<f64>,
    pub latitude: Option<f64>,

    /// Amounts keyed upstream by ISO 4217 numeric code: 840, 933, 978, 643.
    pub price_usd: Option<Decimal>,
    pub price_byn: Option<Decimal>,
    pub price_eur: Option<Decimal>,
    pub price_rub: Option<Decimal>,

    pub images: Vec<String>,
    pub image_url: Option<String>,
    pub appliances: Vec<String>,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub raise_date: Option<DateTime<Utc>>,
    pub new_again_date: Option<DateTime<Utc>>,
}

impl Listing {
    /// A decoded record is kept only when it carries some substance.
    pub fn has_content(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.area_total.is_some()
            || self.price_usd.is_some()
            || self.price_byn.is_some()
            || self.price_eur.is_some()
            || self.price_rub.is_some()
            || !self.images.is_empty()
    }
}

/// Merge an incoming record onto a stored one: identity fields stay with the
/// stored row, everything else comes from the incoming record.
pub fn merge(existing: &Listing, incoming: &Listing) -> Listing {
    Listing {
        id: existing.id,
        code: existing.code,
        ..incoming.clone()
    }
}
