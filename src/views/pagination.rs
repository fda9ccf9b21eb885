use serde::Deserialize;
use serde::Serialize;

use utoipa::ToSchema;

/// Statistics about a paginated response
///
/// Provides the pagination settings issued in the request alongside
/// a few convenience fields useful to navigate the paginated results.
///
/// # Expected usage
///
/// This struct is meant to be flattened in the response of a paginated query.
///
/// ```ignore
/// #[derive(Serialize, ToSchema)]
/// struct MyPaginatedResponse {
///     #[serde(flatten)]
///     stats: PaginationStats,
///     results: Vec<MyData>,
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[cfg_attr(test, derive(Deserialize))]
pub struct PaginationStats {
    /// The total number of items
    #[schema(minimum = 0)]
    pub count: u64,

    /// The number of items per page
    #[schema(minimum = 1)]
    pub page_size: u64,

    /// The total number of pages
    #[schema(minimum = 0)]
    pub page_count: u64,

    /// The current page number
    #[schema(minimum = 1)]
    pub current: u64,

    /// The previous page number, if any
    #[schema(required, minimum = 1)]
    pub previous: Option<u64>,

    /// The next page number, if any
    #[schema(required, minimum = 1)]
    pub next: Option<u64>,
}

impl PaginationStats {
    /// Computes a new [PaginationStats] from pagination settings and query result count
    ///
    /// `page` and `page_size` are expected to be positive, which [PaginationQueryParams]
    /// guarantees. The total is counted in a separate query, so a `total_count` lagging
    /// behind the listed items is tolerated.
    pub fn new(current_page_count: u64, total_count: u64, page: u64, page_size: u64) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let seen = (page - 1)
            .saturating_mul(page_size)
            .saturating_add(current_page_count);
        let total_count = total_count.max(seen);
        let page_count = total_count.div_ceil(page_size);
        let previous = (page > 1 && total_count > 0).then_some(page - 1);
        let next = (seen < total_count).then(|| page.saturating_add(1));
        Self {
            count: total_count,
            page_size,
            page_count,
            current: page,
            previous,
            next,
        }
    }
}

/// Offsets are sent to PostgreSQL as a `bigint`
const MAX_OFFSET: u64 = i64::MAX as u64;

/// Page selection of a listing endpoint
///
/// Pages start at 1. `page_size` is bounded by `MAX_PAGE_SIZE` and defaults to
/// `DEFAULT_PAGE_SIZE` when omitted. Pages starting beyond `i64::MAX` items are
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaginationQueryParams<const MAX_PAGE_SIZE: u64 = 25, const DEFAULT_PAGE_SIZE: u64 = 25> {
    pub page: u64,
    pub page_size: u64,
}

impl<const MAX_PAGE_SIZE: u64, const DEFAULT_PAGE_SIZE: u64>
    PaginationQueryParams<MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE>
{
    /// Number of items to skip before the current page
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }

    pub fn stats(&self, current_page_count: usize, total_count: u64) -> PaginationStats {
        PaginationStats::new(
            current_page_count as u64,
            total_count,
            self.page,
            self.page_size,
        )
    }
}

impl<'de, const MAX_PAGE_SIZE: u64, const DEFAULT_PAGE_SIZE: u64> serde::de::Deserialize<'de>
    for PaginationQueryParams<MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE>
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Schema {
            page: Option<u64>,
            page_size: Option<u64>,
        }
        let Schema { page, page_size } = Schema::deserialize(deserializer)?;
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(serde::de::Error::custom("invalid page 0, pages start at 1"));
        }
        if let Some(size) = page_size
            && !(0 < size && size <= MAX_PAGE_SIZE)
        {
            return Err(serde::de::Error::custom(format!(
                "invalid page size ({size}), expected an integer 0 < page_size <= {MAX_PAGE_SIZE}",
            )));
        }
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE.min(MAX_PAGE_SIZE));
        if (page - 1)
            .checked_mul(page_size)
            .is_none_or(|offset| offset > MAX_OFFSET)
        {
            return Err(serde::de::Error::custom(format!(
                "invalid page ({page}), it starts beyond the last listable item"
            )));
        }
        Ok(Self { page, page_size })
    }
}

impl<const MAX_PAGE_SIZE: u64, const DEFAULT_PAGE_SIZE: u64> utoipa::IntoParams
    for PaginationQueryParams<MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE>
{
    fn into_params(
        _parameter_in_provider: impl Fn() -> Option<utoipa::openapi::path::ParameterIn>,
    ) -> Vec<utoipa::openapi::path::Parameter> {
        use serde_json::json;
        use utoipa::openapi::KnownFormat;
        use utoipa::openapi::ObjectBuilder;
        use utoipa::openapi::Required;
        use utoipa::openapi::SchemaFormat;
        use utoipa::openapi::path::ParameterBuilder;
        use utoipa::openapi::path::ParameterIn;
        use utoipa::openapi::schema::SchemaType;
        use utoipa::openapi::schema::Type;

        [
            ParameterBuilder::new()
                .name("page")
                .parameter_in(ParameterIn::Query)
                .required(Required::False)
                .schema(Some(
                    ObjectBuilder::new()
                        .schema_type(SchemaType::Type(Type::Integer))
                        .format(Some(SchemaFormat::KnownFormat(KnownFormat::Int64)))
                        .minimum(Some(1f64))
                        .default(Some(json!(1))),
                ))
                .build(),
            ParameterBuilder::new()
                .name("page_size")
                .parameter_in(ParameterIn::Query)
                .required(Required::False)
                .schema(Some(
                    ObjectBuilder::new()
                        .schema_type(SchemaType::Type(Type::Integer))
                        .format(Some(SchemaFormat::KnownFormat(KnownFormat::Int64)))
                        .minimum(Some(1f64))
                        .maximum(Some(MAX_PAGE_SIZE as f64))
                        .default(Some(json!(DEFAULT_PAGE_SIZE.min(MAX_PAGE_SIZE)))),
                ))
                .build(),
        ]
        .to_vec()
    }
}


#[cfg(test)]
mod pagination_query_params_tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::PaginationQueryParams;

    type DocumentPages = PaginationQueryParams<100, 24>;

    #[test]
    fn defaults_apply_when_omitted() {
        let params: DocumentPages = serde_json::from_value(json!({})).unwrap();
        assert_eq!(params, DocumentPages { page: 1, page_size: 24 });
        assert_eq!(params.offset(), 0);
    }

    #[test]
    fn offset_skips_previous_pages() {
        let params: DocumentPages = serde_json::from_value(json!({"page": 3, "page_size": 10})).unwrap();
        assert_eq!(params.offset(), 20);
    }

    #[test]
    fn bounds_are_enforced() {
        assert!(serde_json::from_value::<DocumentPages>(json!({"page": 0})).is_err());
        assert!(serde_json::from_value::<DocumentPages>(json!({"page_size": 0})).is_err());
        assert!(serde_json::from_value::<DocumentPages>(json!({"page_size": 101})).is_err());
        assert!(serde_json::from_value::<DocumentPages>(json!({"page_size": 100})).is_ok());
    }

    #[test]
    fn pages_beyond_the_largest_offset_are_rejected() {
        let error = serde_json::from_value::<DocumentPages>(
            json!({"page": u64::MAX, "page_size": 100}),
        )
        .unwrap_err();
        assert!(error.to_string().contains("invalid page"));
        assert!(
            serde_json::from_value::<DocumentPages>(json!({"page": i64::MAX as u64 + 2, "page_size": 1}))
                .is_err()
        );
    }

    #[test]
    fn the_largest_offset_is_accepted() {
        let params: DocumentPages =
            serde_json::from_value(json!({"page": i64::MAX as u64 + 1, "page_size": 1})).unwrap();
        assert_eq!(params.offset(), i64::MAX as u64);
        let stats = params.stats(0, 0);
        assert_eq!(stats.current, i64::MAX as u64 + 1);
        assert_eq!(stats.next, None);
    }
}
