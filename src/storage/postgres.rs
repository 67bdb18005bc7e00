use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::crawler::models::Listing;
use crate::storage::ListingStore;

const SELECT_COLUMNS: &str = "id, code, title, description, headline, \
    area_total, area_living, area_kitchen, rooms, storey, storeys, \
    building_year, overhaul_year, layout, balcony_type, repair_state, \
    furniture, toilet, prepayment, housing_rent, lease_period, \
    contact_name, contact_email, contact_phones, address, town_name, \
    town_district_name, town_sub_district_name, street_name, house_number, \
    building_number, seller, paid, views_count, longitude, latitude, \
    price_usd, price_byn, price_eur, price_rub, images, image_url, \
    appliances, created_at, updated_at, raise_date, new_again_date";

const INSERT_SQL: &str = "\
    INSERT INTO listings (\
        code, title, description, headline, \
        area_total, area_living, area_kitchen, rooms, storey, storeys, \
        building_year, overhaul_year, layout, balcony_type, repair_state, \
        furniture, toilet, prepayment, housing_rent, lease_period, \
        contact_name, contact_email, contact_phones, address, town_name, \
        town_district_name, town_sub_district_name, street_name, house_number, \
        building_number, seller, paid, views_count, longitude, latitude, \
        price_usd, price_byn, price_eur, price_rub, images, image_url, \
        appliances, created_at, updated_at, raise_date, new_again_date) \
    VALUES (\
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
        $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, \
        $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, \
        $31, $32, $33, $34, $35, $36, $37, $38, $39, $40, \
        $41, $42, $43, $44, $45, $46)";

const UPDATE_SQL: &str = "\
    UPDATE listings SET \
        title = $2, description = $3, headline = $4, \
        area_total = $5, area_living = $6, area_kitchen = $7, \
        rooms = $8, storey = $9, storeys = $10, \
        building_year = $11, overhaul_year = $12, layout = $13, \
        balcony_type = $14, repair_state = $15, furniture = $16, \
        toilet = $17, prepayment = $18, housing_rent = $19, \
        lease_period = $20, contact_name = $21, contact_email = $22, \
        contact_phones = $23, address = $24, town_name = $25, \
        town_district_name = $26, town_sub_district_name = $27, \
        street_name = $28, house_number = $29, building_number = $30, \
        seller = $31, paid = $32, views_count = $33, \
        longitude = $34, latitude = $35, \
        price_usd = $36, price_byn = $37, price_eur = $38, price_rub = $39, \
        images = $40, image_url = $41, appliances = $42, \
        created_at = $43, updated_at = $44, raise_date = $45, \
        new_again_date = $46 \
    WHERE code = $1";

#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Read query over stored listings: optional filters, whitelisted sort,
    /// limit/offset paging. Returns the page plus the pre-paging total.
    pub async fn find(&self, query: &ListingQuery) -> Result<(Vec<Listing>, i64)> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM listings");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {SELECT_COLUMNS} FROM listings"));
        push_filters(&mut select, query);
        let direction = if query.descending { "DESC" } else { "ASC" };
        select.push(format!(
            " ORDER BY {} {direction} NULLS LAST",
            query.sort_by.column()
        ));
        select.push(" LIMIT ");
        select.push_bind(query.limit);
        select.push(" OFFSET ");
        select.push_bind(query.offset);

        let items = select
            .build_query_as::<Listing>()
            .fetch_all(&self.pool)
            .await?;

        Ok((items, total))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    Code,
    Title,
    PriceUsd,
    AreaTotal,
}

impl SortBy {
    fn column(self) -> &'static str {
        match self {
            SortBy::Code => "code",
            SortBy::Title => "title",
            SortBy::PriceUsd => "price_usd",
            SortBy::AreaTotal => "area_total",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListingQuery {
    pub code: Option<i32>,
    pub min_price_usd: Option<Decimal>,
    pub max_price_usd: Option<Decimal>,
    pub sort_by: SortBy,
    pub descending: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListingQuery {
    fn default() -> Self {
        Self {
            code: None,
            min_price_usd: None,
            max_price_usd: None,
            sort_by: SortBy::default(),
            descending: false,
            limit: 50,
            offset: 0,
        }
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &ListingQuery) {
    let mut separator = " WHERE ";
    if let Some(code) = query.code {
        builder.push(separator).push("code = ").push_bind(code);
        separator = " AND ";
    }
    if let Some(min) = query.min_price_usd {
        builder.push(separator).push("price_usd >= ").push_bind(min);
        separator = " AND ";
    }
    if let Some(max) = query.max_price_usd {
        builder.push(separator).push("price_usd <= ").push_bind(max);
    }
}

fn bind_listing<'q>(
    query: Query<'q, Postgres, PgArguments>,
    listing: &'q Listing,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(listing.code)
        .bind(&listing.title)
        .bind(&listing.description)
        .bind(&listing.headline)
        .bind(listing.area_total)
        .bind(listing.area_living)
        .bind(listing.area_kitchen)
        .bind(listing.rooms)
        .bind(listing.storey)
        .bind(listing.storeys)
        .bind(listing.building_year)
        .bind(listing.overhaul_year)
        .bind(&listing.layout)
        .bind(&listing.balcony_type)
        .bind(&listing.repair_state)
        .bind(listing.furniture)
        .bind(&listing.toilet)
        .bind(&listing.prepayment)
        .bind(&listing.housing_rent)
        .bind(&listing.lease_period)
        .bind(&listing.contact_name)
        .bind(&listing.contact_email)
        .bind(&listing.contact_phones)
        .bind(&listing.address)
        .bind(&listing.town_name)
        .bind(&listing.town_district_name)
        .bind(&listing.town_sub_district_name)
        .bind(&listing.street_name)
        .bind(listing.house_number)
        .bind(&listing.building_number)
        .bind(&listing.seller)
        .bind(listing.paid)
        .bind(listing.views_count)
        .bind(listing.longitude)
        .bind(listing.latitude)
        .bind(listing.price_usd)
        .bind(listing.price_byn)
        .bind(listing.price_eur)
        .bind(listing.price_rub)
        .bind(&listing.images)
        .bind(&listing.image_url)
        .bind(&listing.appliances)
        .bind(listing.created_at)
        .bind(listing.updated_at)
        .bind(listing.raise_date)
        .bind(listing.new_again_date)
}

#[async_trait]
impl ListingStore for Storage {
    async fn load_by_codes(&self, codes: &[i32]) -> Result<Vec<Listing>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM listings WHERE code = ANY($1)");
        let rows = sqlx::query_as::<_, Listing>(&sql)
            .bind(codes)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn write_batch(&self, inserts: &[Listing], updates: &[Listing]) -> Result<()> {
        if inserts.is_empty() && updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for listing in inserts {
            bind_listing(sqlx::query(INSERT_SQL), listing)
                .execute(&mut *tx)
                .await?;
        }
        for listing in updates {
            bind_listing(sqlx::query(UPDATE_SQL), listing)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn codes_absent_from(&self, keep: &HashSet<i32>) -> Result<Vec<i32>> {
        let keep: Vec<i32> = keep.iter().copied().collect();
        let mut absent: Vec<i32> = sqlx::query_scalar(
            "SELECT code FROM listings WHERE code IS NOT NULL AND NOT (code = ANY($1))",
        )
        .bind(&keep)
        .fetch_all(&self.pool)
        .await?;
        absent.sort_unstable();
        Ok(absent)
    }

    async fn delete_by_codes(&self, codes: &[i32]) -> Result<u64> {
        if codes.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM listings WHERE code = ANY($1)")
            .bind(codes)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn all_codes(&self) -> Result<Vec<i32>> {
        let codes: Vec<i32> = sqlx::query_scalar(
            "SELECT code FROM listings WHERE code IS NOT NULL \
             ORDER BY COALESCE(updated_at, created_at) DESC NULLS LAST",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_compose_in_order() {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM listings");
        let query = ListingQuery {
            code: Some(5),
            min_price_usd: Some(Decimal::new(100, 0)),
            max_price_usd: Some(Decimal::new(900, 0)),
            ..ListingQuery::default()
        };
        push_filters(&mut builder, &query);

        assert_eq!(
            builder.sql(),
            "SELECT COUNT(*) FROM listings WHERE code = $1 AND price_usd >= $2 AND price_usd <= $3"
        );
    }

    #[test]
    fn no_filters_means_no_where_clause() {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM listings");
        push_filters(&mut builder, &ListingQuery::default());

        assert_eq!(builder.sql(), "SELECT COUNT(*) FROM listings");
    }

    #[test]
    fn sort_whitelist_maps_to_columns() {
        assert_eq!(SortBy::Code.column(), "code");
        assert_eq!(SortBy::Title.column(), "title");
        assert_eq!(SortBy::PriceUsd.column(), "price_usd");
        assert_eq!(SortBy::AreaTotal.column(), "area_total");
    }
}
