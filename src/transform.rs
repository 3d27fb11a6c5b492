//! Raw payload to flat product record
//!
//! Field mapping from the catalog's product JSON to [`ProductRecord`]. Every
//! output field is a string; absent, null, `false`, zero and empty inputs all
//! render as the empty string.

use crate::error::{Error, Result};
use crate::types::{Batch, RELATED_PRODUCTS_KEY, RawPayload, UPC_CODE_KEY};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const IMAGE_BASE: &str = "https://cloudinary.images-iherb.com/image/upload/f_auto,q_auto:eco/images";

/// One flattened catalog item, ready for the sinks
///
/// Serialized field names are the column titles used in the output files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Display name
    #[serde(rename = "Title")]
    pub title: String,
    /// Brand name
    #[serde(rename = "Brand")]
    pub brand: String,
    /// Catalog id
    #[serde(rename = "ID")]
    pub id: String,
    /// Root category name
    #[serde(rename = "Category")]
    pub category: String,
    /// Root category id
    #[serde(rename = "Category ID")]
    pub category_id: String,
    /// Price amount without currency symbol
    #[serde(rename = "Price")]
    pub price: String,
    /// Three-letter currency code
    #[serde(rename = "Currency")]
    pub currency: String,
    /// `Available` or `Unavailable`
    #[serde(rename = "Available")]
    pub available: String,
    /// Average rating
    #[serde(rename = "Rating")]
    pub rating: String,
    /// Number of ratings
    #[serde(rename = "Total Rating Count")]
    pub total_rating_count: String,
    /// Recent purchase activity blurb
    #[serde(rename = "Recent Activity Message")]
    pub recent_activity_message: String,
    /// UPC code
    #[serde(rename = "Product Code UPC")]
    pub upc: String,
    /// Brand breadcrumbs, `; ` separated
    #[serde(rename = "Brand Path")]
    pub brand_path: String,
    /// Category breadcrumbs, `; ` separated
    #[serde(rename = "Category Path")]
    pub category_path: String,
    /// Origin and frequently-bought-together summaries
    #[serde(rename = "Related Products")]
    pub related_products: String,
    /// Description with markup removed
    #[serde(rename = "Description")]
    pub description: String,
    /// Canonical product URL
    #[serde(rename = "Link")]
    pub link: String,
    /// Image URLs, `, ` separated
    #[serde(rename = "Images")]
    pub images: String,
    /// Alternate-view image URLs, `, ` separated
    #[serde(rename = "360 Images")]
    pub images_360: String,
    /// Multi-line details block
    #[serde(rename = "Product Details")]
    pub details: String,
}

impl ProductRecord {
    /// Fields as `(column title, value)` pairs, in output order
    pub fn fields(&self) -> [(&'static str, &str); 20] {
        [
            ("Title", self.title.as_str()),
            ("Brand", self.brand.as_str()),
            ("ID", self.id.as_str()),
            ("Category", self.category.as_str()),
            ("Category ID", self.category_id.as_str()),
            ("Price", self.price.as_str()),
            ("Currency", self.currency.as_str()),
            ("Available", self.available.as_str()),
            ("Rating", self.rating.as_str()),
            ("Total Rating Count", self.total_rating_count.as_str()),
            ("Recent Activity Message", self.recent_activity_message.as_str()),
            ("Product Code UPC", self.upc.as_str()),
            ("Brand Path", self.brand_path.as_str()),
            ("Category Path", self.category_path.as_str()),
            ("Related Products", self.related_products.as_str()),
            ("Description", self.description.as_str()),
            ("Link", self.link.as_str()),
            ("Images", self.images.as_str()),
            ("360 Images", self.images_360.as_str()),
            ("Product Details", self.details.as_str()),
        ]
    }
}

/// Synthesize an image URL from a brand code, normalized part number and index
///
/// ```
/// use catalog_harvester::transform::image_url;
///
/// let url = image_url("abc", "123", "7");
/// assert!(url.ends_with("/abc/123/v/7.jpg"));
/// ```
pub fn image_url(brand_code: &str, part_number: &str, index: &str) -> String {
    format!("{IMAGE_BASE}/{brand_code}/{part_number}/v/{index}.jpg")
}

/// Split a price field into `(amount, currency)`
///
/// Structured prices use `amount` and `currencyCode` (USD when missing). A bare
/// string loses a leading `$`, `€` or `£`, which also selects the currency.
pub fn split_price(price: Option<&Value>) -> (String, String) {
    match price {
        None | Some(Value::Null) => (String::new(), "USD".to_string()),
        Some(Value::Object(fields)) => {
            let amount = text(fields.get("amount"));
            let currency = match fields.get("currencyCode") {
                None => "USD".to_string(),
                code => text(code),
            };
            (amount, currency)
        }
        Some(other) => {
            let raw = match other {
                Value::String(s) => s.clone(),
                value => value.to_string(),
            };
            let mut chars = raw.chars();
            let currency = match chars.next() {
                Some('$') => "USD",
                Some('€') => "EUR",
                Some('£') => "GBP",
                _ => return (raw, "USD".to_string()),
            };
            let rest = chars.as_str();
            if rest.is_empty() {
                (raw, currency.to_string())
            } else {
                (rest.to_string(), currency.to_string())
            }
        }
    }
}

/// Maps [`RawPayload`]s to [`ProductRecord`]s
#[derive(Debug)]
pub struct RecordTransformer {
    markup: Regex,
}

impl RecordTransformer {
    /// Build a transformer
    pub fn new() -> Result<Self> {
        let markup =
            Regex::new(r"<.*?>").map_err(|e| Error::Other(format!("invalid markup pattern: {e}")))?;
        Ok(Self { markup })
    }

    /// Transform every payload of a batch, dropping the ones without an id
    pub fn transform_batch(&self, batch: &Batch) -> Vec<ProductRecord> {
        let records: Vec<ProductRecord> = batch
            .items()
            .iter()
            .filter_map(|payload| self.transform(payload))
            .collect();
        tracing::debug!(
            batch = batch.sequence(),
            payloads = batch.len(),
            records = records.len(),
            "batch transformed"
        );
        records
    }

    /// Transform one payload; `None` when the record carries no `id`
    pub fn transform(&self, payload: &RawPayload) -> Option<ProductRecord> {
        let item = &payload.record;
        let id = text(item.get("id"));
        if id.is_empty() {
            tracing::warn!(item_id = %payload.item_id, "skipping record without id");
            return None;
        }

        let brand_code = text(item.get("brandCode")).to_lowercase();
        let part_number = text(item.get("partNumber")).to_lowercase().replace('-', "");

        let mut images = image_urls(&brand_code, &part_number, item.get("imageIndices"));
        if images.is_empty()
            && !brand_code.is_empty()
            && !part_number.is_empty()
            && truthy(item.get("primaryImageIndex"))
        {
            images.push(image_url(
                &brand_code,
                &part_number,
                &text(item.get("primaryImageIndex")),
            ));
        }
        let images_360 = image_urls(&brand_code, &part_number, item.get("imageIndices360"));

        let (price, currency) = split_price(item.get("listPrice"));
        let (brand_paths, category_paths) = canonical_paths(item.get("canonicalPaths"));
        let upc = text(item.get(UPC_CODE_KEY));

        Some(ProductRecord {
            title: text(item.get("displayName")),
            brand: text(item.get("brandName")),
            id,
            category: text(item.get("rootCategoryName")),
            category_id: text(item.get("rootCategoryId")),
            price,
            currency,
            available: if truthy(item.get("isAvailableToPurchase")) {
                "Available".to_string()
            } else {
                "Unavailable".to_string()
            },
            rating: text(item.get("averageRating")),
            total_rating_count: text(item.get("totalRatingCount")),
            recent_activity_message: text(item.get("recentActivityMessage")),
            brand_path: brand_paths.join("; "),
            category_path: category_paths.join("; "),
            related_products: related_products(item.get(RELATED_PRODUCTS_KEY)).join("; "),
            description: self.clean_description(&text(item.get("description"))),
            link: text(item.get("url")),
            images: images.join(", "),
            images_360: images_360.join(", "),
            details: details(item, &part_number, &upc),
            upc,
        })
    }

    fn clean_description(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }
        let spaced = raw
            .replace("</li>", "\n")
            .replace("</p>", "\n")
            .replace("<br>", "\n")
            .replace("<br/>", "\n")
            .replace("&nbsp;", " ");
        self.markup.replace_all(&spaced, "").trim().to_string()
    }
}

/// Render a JSON value as output text
fn text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => String::new(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

fn image_urls(brand_code: &str, part_number: &str, indices: Option<&Value>) -> Vec<String> {
    if brand_code.is_empty() || part_number.is_empty() {
        return Vec::new();
    }
    match indices {
        Some(Value::Array(indices)) => indices
            .iter()
            .map(|index| image_url(brand_code, part_number, &index_text(index)))
            .collect(),
        _ => Vec::new(),
    }
}

// Index 0 is a real image, so no truthiness here
fn index_text(index: &Value) -> String {
    match index {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Breadcrumbs as `(brand paths, category paths)`, each joined root first
fn canonical_paths(paths: Option<&Value>) -> (Vec<String>, Vec<String>) {
    let mut brands = Vec::new();
    let mut categories = Vec::new();

    let Some(Value::Array(paths)) = paths else {
        return (brands, categories);
    };

    for path in paths {
        let Value::Array(segments) = path else {
            continue;
        };
        let names: Vec<String> = segments
            .iter()
            .rev()
            .map(|segment| text(segment.get("displayName")))
            .collect();
        let Some(root) = names.first() else {
            continue;
        };

        if root.contains("Brands A-Z") {
            brands.push(names.join(" > "));
        } else if root.contains("Categories") {
            categories.push(names.join(" > "));
        }
    }

    (brands, categories)
}

fn related_products(related: Option<&Value>) -> Vec<String> {
    let mut out = Vec::new();
    let Some(Value::Object(related)) = related else {
        return out;
    };

    if let Some(origin) = related.get("originProduct").filter(|v| truthy(Some(v))) {
        out.push(format!(
            "Current item: {}, {}",
            text(origin.get("name")),
            text(origin.get("listPrice"))
        ));
    }
    if let Some(Value::Array(recommended)) = related.get("recommendedProducts") {
        for product in recommended {
            out.push(format!(
                "{}, {}",
                text(product.get("name")),
                text(product.get("listPrice"))
            ));
        }
    }
    out
}

fn shipping_weight(weight: Option<&Value>) -> String {
    match weight {
        Some(Value::Object(fields)) => format!(
            "{} {}",
            text(fields.get("amount")),
            text(fields.get("unit"))
        )
        .trim()
        .to_string(),
        other => text(other),
    }
}

fn details(item: &Map<String, Value>, part_number: &str, upc: &str) -> String {
    let mut out = String::new();
    let mut line = |label: &str, value: String| {
        if !value.is_empty() {
            out.push_str(&format!("\n• {label}: {value}"));
        }
    };

    line("Best by", text(item.get("formattedExpirationDate")));
    line("First available", text(item.get("formattedOnSaleDate")));
    line("Shipping weight", shipping_weight(item.get("actualWeight")));
    line("Product code", part_number.to_string());
    line("UPC", upc.to_string());
    line("Package quantity", text(item.get("packageQuantity")));
    line("Dimensions", text(item.get("dimensions")));

    if let Some(Value::Array(ranks)) = item.get("productRanks")
        && !ranks.is_empty()
    {
        out.push_str("\n\nProduct rankings:");
        for rank in ranks {
            out.push_str(&format!(
                "\n#{} in {}",
                text(rank.get("rank")),
                text(rank.get("categoryDisplayName"))
            ));
        }
    }

    out.trim().to_string()
}
