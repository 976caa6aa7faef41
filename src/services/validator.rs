//! Coupon validation service.
//!
//! Resolves a coupon URL to its course, asks the marketplace for the price
//! under that coupon and builds a [`CourseRecord`] when the course is free.

use std::sync::Arc;

use chrono::Utc;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::CourseRecord;
use crate::utils::date::parse_expiry;
use crate::utils::http::Fetcher;
use crate::utils::url::{coupon_api_url, course_api_url, extract_coupon_code};

/// Course id used when the landing page does not reveal one.
pub const UNRESOLVED_COURSE_ID: i64 = -1;

const COURSE_ID_ATTR: &str = "data-clp-course-id";
const UNKNOWN: &str = "Unknown";

const PRICING_RESULT: &str = "/price_text/data/pricing_result";
const INTRODUCTION_ASSET: &str = "/sidebar_container/componentProps/introductionAsset";

/// Outcome of validating a single coupon URL.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// The coupon currently makes the course free.
    Valid(CourseRecord),
    /// The coupon is not (or no longer) free.
    Expired {
        /// Resolved course id, or [`UNRESOLVED_COURSE_ID`]
        course_id: i64,
        title: Option<String>,
    },
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid(_))
    }
}

/// Course metadata read from the course API.
#[derive(Debug, Default)]
struct CourseDetails {
    category: String,
    subcategory: String,
    title: String,
    level: String,
    author: String,
    content_length: i64,
    rating: f64,
    reviews: i64,
    students: i64,
    language: String,
    heading: String,
    description: String,
}

/// Pricing data read from the coupon API.
#[derive(Debug)]
struct CouponDetails {
    price: Option<f64>,
    expires_at: chrono::DateTime<Utc>,
    uses_remaining: i64,
    preview_image: String,
    preview_video: String,
}

/// Validates coupon URLs against the marketplace APIs.
#[derive(Clone)]
pub struct CouponValidator {
    fetcher: Arc<dyn Fetcher>,
    body_selector: Selector,
    fallback_selector: Selector,
}

impl CouponValidator {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        Ok(Self {
            fetcher,
            body_selector: parse_selector("body")?,
            fallback_selector: parse_selector("#udemy")?,
        })
    }

    /// Validate `coupon_url`.
    ///
    /// `known_course_id` skips the landing page fetch. Fetch failures are
    /// tolerated and end up as [`Validation::Expired`]; only a URL without a
    /// coupon code is an error.
    pub async fn validate(
        &self,
        coupon_url: &str,
        known_course_id: Option<i64>,
    ) -> Result<Validation> {
        let coupon_code = extract_coupon_code(coupon_url)
            .ok_or_else(|| AppError::coupon(coupon_url, "missing couponCode parameter"))?;

        let course_id = match known_course_id.filter(|id| *id > 0) {
            Some(id) => id,
            None => self.resolve_course_id(coupon_url).await,
        };

        let coupon_api = coupon_api_url(course_id, &coupon_code);
        let course_api = course_api_url(course_id);
        let (coupon_json, course_json) = futures::join!(
            self.fetcher.fetch_json(&coupon_api),
            self.fetcher.fetch_json(&course_api),
        );

        let course = course_json
            .as_ref()
            .map(parse_course_details)
            .unwrap_or_default();
        let coupon = parse_coupon_details(coupon_json.as_ref());

        if coupon.price != Some(0.0) {
            log::debug!(
                "Coupon not free ({:?}) for course {}: {}",
                coupon.price,
                course_id,
                coupon_url
            );
            let title = Some(course.title).filter(|t| !t.is_empty());
            return Ok(Validation::Expired { course_id, title });
        }

        let now = Utc::now();
        Ok(Validation::Valid(CourseRecord {
            course_id,
            category: course.category,
            subcategory: course.subcategory,
            title: course.title,
            level: course.level,
            author: course.author,
            content_length: course.content_length,
            rating: course.rating,
            reviews: course.reviews,
            students: course.students,
            coupon_code,
            coupon_url: coupon_url.to_string(),
            expires_at: coupon.expires_at,
            uses_remaining: coupon.uses_remaining,
            preview_image: coupon.preview_image,
            preview_video: coupon.preview_video,
            heading: course.heading,
            description: course.description,
            language: course.language,
            is_new: false,
            created_at: now,
            updated_at: now,
        }))
    }

    /// Read the course id from the landing page.
    async fn resolve_course_id(&self, coupon_url: &str) -> i64 {
        let Some(text) = self.fetcher.fetch_text(coupon_url).await else {
            return UNRESOLVED_COURSE_ID;
        };
        let document = Html::parse_document(&text);
        self.course_id_from_document(&document)
            .unwrap_or(UNRESOLVED_COURSE_ID)
    }

    fn course_id_from_document(&self, document: &Html) -> Option<i64> {
        [&self.body_selector, &self.fallback_selector]
            .into_iter()
            .find_map(|selector| {
                document
                    .select(selector)
                    .next()
                    .and_then(|el| el.value().attr(COURSE_ID_ATTR))
                    .and_then(|id| id.trim().parse().ok())
            })
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| AppError::selector(selector, e.to_string()))
}

fn str_at<'a>(json: &'a Value, pointer: &str) -> Option<&'a str> {
    json.pointer(pointer).and_then(Value::as_str)
}

fn i64_at(json: &Value, pointer: &str) -> i64 {
    json.pointer(pointer)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
}

fn parse_course_details(json: &Value) -> CourseDetails {
    let level = str_at(json, "/instructional_level").unwrap_or_default();
    let level = if level.contains("Levels") {
        level.to_string()
    } else {
        level.replace(" Level", "")
    };

    let subcategory = str_at(json, "/primary_subcategory/title")
        .or_else(|| str_at(json, "/primary_sub_category/title"))
        .unwrap_or(UNKNOWN);

    CourseDetails {
        category: str_at(json, "/primary_category/title")
            .unwrap_or(UNKNOWN)
            .to_string(),
        subcategory: subcategory.to_string(),
        title: str_at(json, "/title").unwrap_or_default().to_string(),
        level,
        author: str_at(json, "/visible_instructors/0/title")
            .unwrap_or(UNKNOWN)
            .to_string(),
        content_length: i64_at(json, "/estimated_content_length"),
        rating: json
            .pointer("/avg_rating_recent")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        reviews: i64_at(json, "/num_reviews"),
        students: i64_at(json, "/num_subscribers"),
        language: str_at(json, "/locale/simple_english_title")
            .unwrap_or_default()
            .to_string(),
        heading: str_at(json, "/headline").unwrap_or_default().to_string(),
        description: str_at(json, "/description")
            .unwrap_or_default()
            .trim()
            .replace('\n', ""),
    }
}

fn parse_coupon_details(json: Option<&Value>) -> CouponDetails {
    let Some(json) = json else {
        return CouponDetails {
            price: None,
            expires_at: parse_expiry(None),
            uses_remaining: 0,
            preview_image: String::new(),
            preview_video: String::new(),
        };
    };

    let price = json
        .pointer(&format!("{PRICING_RESULT}/price/amount"))
        .and_then(|amount| match amount {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });

    CouponDetails {
        price,
        expires_at: parse_expiry(str_at(json, &format!("{PRICING_RESULT}/campaign/end_time"))),
        uses_remaining: i64_at(json, &format!("{PRICING_RESULT}/campaign/uses_remaining")),
        preview_image: str_at(json, &format!("{INTRODUCTION_ASSET}/images/image_750x422"))
            .unwrap_or_default()
            .to_string(),
        preview_video: str_at(json, &format!("{INTRODUCTION_ASSET}/course_preview_path"))
            .unwrap_or_default()
            .to_string(),
    }
}


#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::fixtures::{course_json, pricing_json};
    use super::*;
    use crate::utils::http::stub::StubFetcher;

    const COUPON_URL: &str = "https://www.udemy.com/course/rust-basics/?couponCode=FREE2030";

    fn stub_for(course_id: i64, amount: serde_json::Value) -> StubFetcher {
        StubFetcher::new()
            .with(
                COUPON_URL,
                format!(r#"<html><body data-clp-course-id="{course_id}"></body></html>"#),
            )
            .with(coupon_api_url(course_id, "FREE2030"), pricing_json(amount))
            .with(course_api_url(course_id), course_json("Rust Basics"))
    }

    fn validator(fetcher: StubFetcher) -> (CouponValidator, Arc<StubFetcher>) {
        let fetcher = Arc::new(fetcher);
        let validator = CouponValidator::new(fetcher.clone()).unwrap();
        (validator, fetcher)
    }

    #[tokio::test]
    async fn test_free_coupon_yields_record() {
        let (validator, _) = validator(stub_for(123, json!(0.0)));

        let Validation::Valid(record) = validator.validate(COUPON_URL, None).await.unwrap() else {
            panic!("expected a valid record");
        };

        assert_eq!(record.course_id, 123);
        assert_eq!(record.title, "Rust Basics");
        assert_eq!(record.coupon_code, "FREE2030");
        assert_eq!(record.coupon_url, COUPON_URL);
        assert_eq!(record.level, "Beginner");
        assert_eq!(record.author, "Jane Doe");
        assert_eq!(record.subcategory, "Programming Languages");
        assert_eq!(record.description, "<p>Line one</p><p>Line two</p>");
        assert_eq!(record.uses_remaining, 842);
        assert_eq!(record.students, 1200);
        assert_eq!(record.content_length, 95);
        assert_eq!(record.preview_image, "https://img.test/750x422.jpg");
        assert_eq!(
            record.expires_at,
            Utc.with_ymd_and_hms(2030, 5, 19, 17, 24, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_paid_coupon_is_expired() {
        let (validator, _) = validator(stub_for(123, json!(9.99)));

        let outcome = validator.validate(COUPON_URL, None).await.unwrap();
        assert_eq!(
            outcome,
            Validation::Expired {
                course_id: 123,
                title: Some("Rust Basics".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_unparsable_or_missing_price_is_expired() {
        for amount in [json!("free"), json!(null), json!({"value": 0})] {
            let (validator, _) = validator(stub_for(123, amount));
            let outcome = validator.validate(COUPON_URL, None).await.unwrap();
            assert!(!outcome.is_valid());
        }
    }

    #[tokio::test]
    async fn test_numeric_string_price() {
        let (validator, _) = validator(stub_for(123, json!("0")));
        assert!(validator.validate(COUPON_URL, None).await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_known_course_id_skips_landing_page() {
        let (validator, fetcher) = validator(stub_for(123, json!(0)));

        let outcome = validator.validate(COUPON_URL, Some(123)).await.unwrap();
        assert!(outcome.is_valid());
        assert_eq!(fetcher.request_count(COUPON_URL), 0);
    }

    #[tokio::test]
    async fn test_fallback_course_id_location() {
        let fetcher = StubFetcher::new()
            .with(
                COUPON_URL,
                r#"<html><body><div id="udemy" data-clp-course-id="77"></div></body></html>"#,
            )
            .with(coupon_api_url(77, "FREE2030"), pricing_json(json!(0)))
            .with(course_api_url(77), course_json("Fallback"));
        let (validator, _) = validator(fetcher);

        let Validation::Valid(record) = validator.validate(COUPON_URL, None).await.unwrap() else {
            panic!("expected a valid record");
        };
        assert_eq!(record.course_id, 77);
    }

    #[tokio::test]
    async fn test_unreachable_landing_page_is_expired() {
        let (validator, _) = validator(StubFetcher::new());

        let outcome = validator.validate(COUPON_URL, None).await.unwrap();
        assert_eq!(
            outcome,
            Validation::Expired {
                course_id: UNRESOLVED_COURSE_ID,
                title: None,
            }
        );
    }

    #[tokio::test]
    async fn test_missing_metadata_uses_defaults() {
        let fetcher =
            StubFetcher::new().with(coupon_api_url(5, "FREE2030"), pricing_json(json!(0)));
        let (validator, _) = validator(fetcher);

        let Validation::Valid(record) = validator.validate(COUPON_URL, Some(5)).await.unwrap()
        else {
            panic!("expected a valid record");
        };
        assert_eq!(record.author, "Unknown");
        assert_eq!(record.category, "Unknown");
        assert_eq!(record.subcategory, "Unknown");
        assert_eq!(record.title, "");
        assert_eq!(record.students, 0);
    }

    #[tokio::test]
    async fn test_missing_coupon_code_is_error() {
        let (validator, _) = validator(StubFetcher::new());
        let result = validator
            .validate("https://www.udemy.com/course/rust-basics/", None)
            .await;
        assert!(matches!(result, Err(AppError::Coupon { .. })));
    }

    #[test]
    fn test_all_levels_kept() {
        let details = parse_course_details(&json!({
            "instructional_level": "All Levels",
            "primary_sub_category": { "title": "Legacy" }
        }));
        assert_eq!(details.level, "All Levels");
        assert_eq!(details.subcategory, "Legacy");
    }
}
