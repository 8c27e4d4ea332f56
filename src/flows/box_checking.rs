//! Box checking: verify the content of an outbound handling unit before it
//! is closed.
//!
//! | Step | Input            | Reference                          |
//! |------|------------------|------------------------------------|
//! | 10   | box barcode      | handling units by barcode          |
//! | 20   | article/feature  | `scanArticleOrFeature` proxy call  |
//! | 30   | checked quantity | content matched at step 20         |

use crate::check::{Check, CheckInput, Page, Rejection};
use crate::process::{ProcessKind, ProcessRecord, StepIndex, StepPayload};
use crate::service::{MutationService, ServiceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Proxy endpoint resolving a scanned article or feature code.
pub const SCAN_ARTICLE_ENDPOINT: &str = "/api/stock-management/scanArticleOrFeature";

/// Step 10: scan the box.
pub const SCAN_BOX: StepIndex = StepIndex::new(10);
/// Step 20: scan an article or feature inside the box.
pub const SCAN_ARTICLE: StepIndex = StepIndex::new(20);
/// Step 30: enter the counted quantity.
pub const ENTER_QUANTITY: StepIndex = StepIndex::new(30);

/// Handling unit categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandlingUnitCategory {
    /// Received goods
    Inbound,
    /// Prepared for shipping
    Outbound,
    /// Stored on a location
    Stock,
}

/// Status of a handling unit on its way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundStatus {
    /// Still being filled
    InPreparation,
    /// Closed and waiting for the check
    ToBeChecked,
    /// Check done
    Checked,
    /// Waiting at the dock
    ToBeLoaded,
    /// On the truck
    Loaded,
    /// Shipment cancelled
    Cancelled,
}

/// Outbound side of a handling unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlingUnitOutbound {
    /// Outbound identifier
    pub id: String,
    /// Shipping status
    pub status: OutboundStatus,
    /// Delivery the unit ships with
    #[serde(default)]
    pub delivery_id: Option<String>,
}

/// A handling unit nested in another one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildHandlingUnit {
    /// Handling unit identifier
    pub id: String,
    /// Printed name
    pub name: String,
}

/// One article line packed in a handling unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlingUnitContent {
    /// Content line identifier
    pub id: String,
    /// Packed article
    pub article_id: String,
    /// Packed quantity
    pub quantity: u64,
}

/// Handling unit as returned by the barcode lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlingUnit {
    /// Handling unit identifier
    pub id: String,
    /// Printed name
    pub name: String,
    /// Scannable barcode
    pub barcode: String,
    /// Category
    pub category: HandlingUnitCategory,
    /// Enclosing handling unit, if nested
    #[serde(default)]
    pub parent_handling_unit_id: Option<String>,
    /// Handling units packed inside this one
    #[serde(default)]
    pub children_handling_units: Vec<ChildHandlingUnit>,
    /// Article lines
    #[serde(default)]
    pub handling_unit_contents: Vec<HandlingUnitContent>,
    /// Outbound records, at most one in practice
    #[serde(default)]
    pub handling_unit_outbounds: Vec<HandlingUnitOutbound>,
}

/// Body of the `scanArticleOrFeature` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanArticleRequest {
    /// Raw scanned barcode
    pub scanned_info: String,
    /// Box being checked
    pub handling_unit_id: String,
}

/// Content line matched by an article or feature scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMatch {
    /// Matched content line
    pub content_id: String,
    /// Article of the line
    pub article_id: String,
    /// Display name of the article
    pub article_name: String,
    /// Feature code, when a feature was scanned
    #[serde(default)]
    pub feature_code: Option<String>,
    /// Quantity still to be checked on this line
    pub remaining_quantity: u64,
}

/// Quantity confirmed for a content line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckedQuantity {
    /// Checked content line
    pub content_id: String,
    /// Counted quantity
    pub quantity: u64,
}

/// Payloads of the box checking steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BoxCheckingPayload {
    /// Step 10: the scanned box
    HandlingUnit(HandlingUnit),
    /// Step 20: the matched content line
    Content(ContentMatch),
    /// Step 30: the counted quantity
    Quantity(CheckedQuantity),
}

impl StepPayload for BoxCheckingPayload {
    fn step(&self) -> StepIndex {
        match self {
            BoxCheckingPayload::HandlingUnit(_) => SCAN_BOX,
            BoxCheckingPayload::Content(_) => SCAN_ARTICLE,
            BoxCheckingPayload::Quantity(_) => ENTER_QUANTITY,
        }
    }
}

/// The `"boxChecking"` process.
#[derive(Debug)]
pub struct BoxChecking;

impl ProcessKind for BoxChecking {
    const NAME: &'static str = "boxChecking";
    type Payload = BoxCheckingPayload;

    fn steps() -> &'static [StepIndex] {
        &[SCAN_BOX, SCAN_ARTICLE, ENTER_QUANTITY]
    }
}

/// Backend collaborators of the box checking process.
#[async_trait]
pub trait BoxCheckingBackend: Send + Sync {
    /// Handling units whose barcode equals `barcode`.
    async fn find_handling_units(&self, barcode: &str) -> Result<Page<HandlingUnit>, ServiceError>;

    /// Resolves a scanned article or feature code inside a handling unit.
    async fn scan_article_or_feature(
        &self,
        request: &ScanArticleRequest,
    ) -> Result<Option<ContentMatch>, ServiceError>;
}

/// Calls the `scanArticleOrFeature` proxy through `service`.
///
/// A `null` response means the code matched nothing.
pub async fn scan_article_via(
    service: &MutationService,
    request: &ScanArticleRequest,
) -> Result<Option<ContentMatch>, ServiceError> {
    let body = serde_json::to_value(request)
        .map_err(|e| ServiceError::Unflagged(format!("unencodable request: {e}")))?;
    service.call(SCAN_ARTICLE_ENDPOINT, body).await
}

fn scanned_box(record: &ProcessRecord<BoxCheckingPayload>) -> Option<&HandlingUnit> {
    match record.data(SCAN_BOX) {
        Some(BoxCheckingPayload::HandlingUnit(unit)) => Some(unit),
        _ => None,
    }
}

fn matched_content(record: &ProcessRecord<BoxCheckingPayload>) -> Option<&ContentMatch> {
    match record.data(SCAN_ARTICLE) {
        Some(BoxCheckingPayload::Content(content)) => Some(content),
        _ => None,
    }
}

/// Step 10: the scanned box must be a top-level outbound unit awaiting check.
pub struct ScanBoxCheck {
    backend: Arc<dyn BoxCheckingBackend>,
}

impl ScanBoxCheck {
    pub fn new(backend: Arc<dyn BoxCheckingBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Check<BoxChecking> for ScanBoxCheck {
    type Reference = HandlingUnit;

    fn step(&self) -> StepIndex {
        SCAN_BOX
    }

    fn not_found_key(&self) -> &str {
        "messages:no-handling-unit"
    }

    async fn lookup(
        &self,
        input: &CheckInput,
        _record: &ProcessRecord<BoxCheckingPayload>,
    ) -> Result<Option<HandlingUnit>, ServiceError> {
        let Some(barcode) = input.as_scanned() else {
            return Ok(None);
        };
        Ok(self.backend.find_handling_units(barcode).await?.into_first())
    }

    fn validate(
        &self,
        _input: &CheckInput,
        unit: &HandlingUnit,
        _record: &ProcessRecord<BoxCheckingPayload>,
    ) -> Result<BoxCheckingPayload, Rejection> {
        if unit.category != HandlingUnitCategory::Outbound {
            return Err(Rejection::invalid("messages:wrong-handling-unit-type"));
        }
        if unit.parent_handling_unit_id.is_some() {
            return Err(Rejection::invalid("messages:handling-unit-is-child"));
        }
        let to_be_checked = unit
            .handling_unit_outbounds
            .first()
            .is_some_and(|outbound| outbound.status == OutboundStatus::ToBeChecked);
        if !to_be_checked {
            return Err(Rejection::invalid(
                "messages:handling-unit-not-to-be-checked",
            ));
        }
        Ok(BoxCheckingPayload::HandlingUnit(unit.clone()))
    }
}

/// Step 20: the scanned code must resolve to a line of the box still to check.
///
/// Backend-flagged errors send the operator back to the box scan.
pub struct ScanArticleCheck {
    backend: Arc<dyn BoxCheckingBackend>,
}

impl ScanArticleCheck {
    pub fn new(backend: Arc<dyn BoxCheckingBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Check<BoxChecking> for ScanArticleCheck {
    type Reference = ContentMatch;

    fn step(&self) -> StepIndex {
        SCAN_ARTICLE
    }

    fn not_found_key(&self) -> &str {
        "messages:no-article-or-feature"
    }

    async fn lookup(
        &self,
        input: &CheckInput,
        record: &ProcessRecord<BoxCheckingPayload>,
    ) -> Result<Option<ContentMatch>, ServiceError> {
        let Some(scanned) = input.as_scanned() else {
            return Ok(None);
        };
        let unit = scanned_box(record)
            .ok_or_else(|| ServiceError::Unflagged("no box scanned yet".to_string()))?;
        let request = ScanArticleRequest {
            scanned_info: scanned.to_string(),
            handling_unit_id: unit.id.clone(),
        };
        self.backend.scan_article_or_feature(&request).await
    }

    fn validate(
        &self,
        _input: &CheckInput,
        content: &ContentMatch,
        record: &ProcessRecord<BoxCheckingPayload>,
    ) -> Result<BoxCheckingPayload, Rejection> {
        let in_box = scanned_box(record).is_some_and(|unit| {
            unit.handling_unit_contents
                .iter()
                .any(|line| line.id == content.content_id)
        });
        if !in_box {
            return Err(Rejection::invalid("messages:unexpected-scanned-item"));
        }
        if content.remaining_quantity == 0 {
            return Err(Rejection::invalid("messages:content-already-checked"));
        }
        Ok(BoxCheckingPayload::Content(content.clone()))
    }

    fn rewind_on_backend_error(&self) -> bool {
        true
    }
}

/// Step 30: the counted quantity must be between 1 and what remains to check.
#[derive(Debug, Default)]
pub struct QuantityCheck;

#[async_trait]
impl Check<BoxChecking> for QuantityCheck {
    type Reference = ContentMatch;

    fn step(&self) -> StepIndex {
        ENTER_QUANTITY
    }

    fn not_found_key(&self) -> &str {
        "messages:no-article-or-feature"
    }

    async fn lookup(
        &self,
        _input: &CheckInput,
        record: &ProcessRecord<BoxCheckingPayload>,
    ) -> Result<Option<ContentMatch>, ServiceError> {
        Ok(matched_content(record).cloned())
    }

    fn validate(
        &self,
        input: &CheckInput,
        content: &ContentMatch,
        _record: &ProcessRecord<BoxCheckingPayload>,
    ) -> Result<BoxCheckingPayload, Rejection> {
        match input.as_quantity() {
            Some(quantity) if (1..=content.remaining_quantity).contains(&quantity) => {
                Ok(BoxCheckingPayload::Quantity(CheckedQuantity {
                    content_id: content.content_id.clone(),
                    quantity,
                }))
            }
            _ => Err(Rejection::invalid("messages:wrong-quantity")),
        }
    }
}
