// src/utils/url.rs

//! Marketplace URL helpers.

const API_BASE: &str = "https://www.udemy.com/api-2.0";

const COUPON_COMPONENTS: &str = "deal_badge,discount_expiration,gift_this_course,price_text,\
purchase,recommendation,redeem_coupon,cacheable_deal_badge,cacheable_discount_expiration,\
cacheable_price_text,cacheable_buy_button,buy_button,buy_for_team,cacheable_purchase_text,\
cacheable_add_to_cart,money_back_guarantee,instructor_links,incentives_context,\
top_companies_notice_context,curated_for_ufb_notice_context,sidebar_container,\
purchase_tabs_context,subscribe_team_modal_context,lifetime_access_context,available_coupons";

const COURSE_FIELDS: &str = "title,context_info,primary_category,primary_subcategory,\
avg_rating_recent,visible_instructors,locale,estimated_content_length,num_subscribers,\
num_reviews,description,headline,instructional_level";

const COUPON_PARAM: &str = "couponCode=";

/// Pricing endpoint for a course and coupon code.
///
/// # Examples
/// ```
/// use coupon_crawler::utils::url::coupon_api_url;
///
/// let url = coupon_api_url(12345, "ABC123");
/// assert!(url.starts_with("https://www.udemy.com/api-2.0/course-landing-components/12345/me/?couponCode=ABC123&"));
/// ```
pub fn coupon_api_url(course_id: i64, coupon_code: &str) -> String {
    format!(
        "{API_BASE}/course-landing-components/{course_id}/me/?couponCode={coupon_code}&components={COUPON_COMPONENTS}"
    )
}

/// Course metadata endpoint.
pub fn course_api_url(course_id: i64) -> String {
    format!("{API_BASE}/courses/{course_id}/?fields[course]={COURSE_FIELDS}")
}

/// Extract the coupon code from a coupon URL.
///
/// Returns `None` when the URL carries no `couponCode` parameter.
pub fn extract_coupon_code(coupon_url: &str) -> Option<String> {
    let (_, rest) = coupon_url.split_once(COUPON_PARAM)?;
    let code = rest.split(['&', '#']).next().unwrap_or_default();
    Some(code.to_string())
}

/// Whether a link already points at the marketplace.
pub fn is_marketplace_url(url: &str) -> bool {
    url.starts_with("https://www.udemy.com") || url.starts_with("https://udemy.com/")
}
