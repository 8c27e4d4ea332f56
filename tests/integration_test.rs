use async_trait::async_trait;
use scanflow::flows::box_checking::{
    scan_article_via, BoxChecking, BoxCheckingBackend, BoxCheckingPayload, ContentMatch,
    HandlingUnit, OutboundStatus, QuantityCheck, ScanArticleCheck, ScanArticleRequest,
    ScanBoxCheck, ENTER_QUANTITY, SCAN_ARTICLE, SCAN_BOX,
};
use scanflow::{
    CheckInput, ErrorCodeMap, FileStorage, MutationService, Page, ProcessKind, ProcessStore,
    ProxyReply, ProxyTransport, RecordingNotifier, Rejection, ServiceError, Session, StepIndex,
    StepPayload, Transition, STEP_REWOUND_KEY,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_test::{assert_err, assert_ok};

fn handling_unit(status: &str) -> HandlingUnit {
    serde_json::from_value(json!({
        "id": "hu-1",
        "name": "HU123",
        "barcode": "HU123",
        "category": "OUTBOUND",
        "parentHandlingUnitId": null,
        "childrenHandlingUnits": [],
        "handlingUnitContents": [{ "id": "c-1", "articleId": "a-1", "quantity": 6 }],
        "handlingUnitOutbounds": [{ "id": "o-1", "status": status }]
    }))
    .unwrap()
}

struct ScriptedProxy {
    replies: Mutex<VecDeque<ProxyReply>>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl ProxyTransport for ScriptedProxy {
    async fn post(&self, _endpoint: &str, body: Value) -> Result<ProxyReply, ServiceError> {
        self.bodies.lock().unwrap().push(body);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ServiceError::Unflagged("no scripted reply".to_string()))
    }
}

struct Warehouse {
    unit: Mutex<Option<HandlingUnit>>,
    proxy: MutationService,
}

impl Warehouse {
    fn new(unit: Option<HandlingUnit>, replies: Vec<ProxyReply>) -> (Arc<Self>, Arc<Mutex<Vec<Value>>>) {
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let proxy = MutationService::new(ScriptedProxy {
            replies: Mutex::new(replies.into()),
            bodies: bodies.clone(),
        });
        let warehouse = Arc::new(Self {
            unit: Mutex::new(unit),
            proxy,
        });
        (warehouse, bodies)
    }
}

#[async_trait]
impl BoxCheckingBackend for Warehouse {
    async fn find_handling_units(&self, barcode: &str) -> Result<Page<HandlingUnit>, ServiceError> {
        let results: Vec<HandlingUnit> = self
            .unit
            .lock()
            .unwrap()
            .iter()
            .filter(|unit| unit.barcode == barcode)
            .cloned()
            .collect();
        Ok(Page {
            count: results.len() as u64,
            results,
        })
    }

    async fn scan_article_or_feature(
        &self,
        request: &ScanArticleRequest,
    ) -> Result<Option<ContentMatch>, ServiceError> {
        scan_article_via(&self.proxy, request).await
    }
}

fn ok_reply(response: Value) -> ProxyReply {
    ProxyReply {
        status: 200,
        body: json!({ "response": response }).to_string(),
    }
}

fn session(store: &ProcessStore) -> (Session<BoxChecking>, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::new());
    let session = Session::<BoxChecking>::new(store.clone())
        .with_notifier(notifier.clone())
        .with_error_codes(
            ErrorCodeMap::new().with("FAPI_000012", "messages:box-closed-meanwhile"),
        );
    (session, notifier)
}

#[tokio::test]
async fn test_box_scan_commits_handling_unit() {
    let store = ProcessStore::in_memory();
    let (session, notifier) = session(&store);
    let (warehouse, _) = Warehouse::new(Some(handling_unit("TO_BE_CHECKED")), Vec::new());

    let current_before = session.current_step().unwrap();
    let mut stage = session.open(ScanBoxCheck::new(warehouse)).unwrap();
    let transition = stage.submit(CheckInput::scanned("HU123")).await.unwrap();

    assert_eq!(transition, Transition::Committed);
    let record = session.record().unwrap();
    assert_eq!(
        record.data(SCAN_BOX),
        Some(&BoxCheckingPayload::HandlingUnit(handling_unit("TO_BE_CHECKED")))
    );
    assert_eq!(record.previous_step(SCAN_BOX), Some(current_before));
    assert!(notifier.notices().is_empty());
}

#[tokio::test]
async fn test_box_not_to_be_checked_is_rejected() {
    let store = ProcessStore::in_memory();
    let (session, notifier) = session(&store);
    let (warehouse, _) = Warehouse::new(Some(handling_unit("CHECKED")), Vec::new());

    let mut stage = session.open(ScanBoxCheck::new(warehouse.clone())).unwrap();
    let transition = stage.submit(CheckInput::scanned("HU123")).await.unwrap();

    assert_eq!(
        transition,
        Transition::Rejected {
            rejection: Rejection::invalid("messages:handling-unit-not-to-be-checked"),
            rewound_to: None,
        }
    );
    assert_eq!(
        notifier.last_key().as_deref(),
        Some("messages:handling-unit-not-to-be-checked")
    );
    assert!(session.record().unwrap().data(SCAN_BOX).is_none());

    // Unknown barcode is a distinct message.
    let transition = stage.submit(CheckInput::scanned("HU999")).await.unwrap();
    assert!(matches!(
        transition,
        Transition::Rejected { rejection: Rejection::NotFound { .. }, .. }
    ));
    assert_eq!(notifier.last_key().as_deref(), Some("messages:no-handling-unit"));

    // Status fixed on the backend: the operator re-scans and succeeds.
    if let Some(unit) = warehouse.unit.lock().unwrap().as_mut() {
        unit.handling_unit_outbounds[0].status = OutboundStatus::ToBeChecked;
    }
    assert_eq!(
        stage.submit(CheckInput::scanned("HU123")).await.unwrap(),
        Transition::Committed
    );
}

#[tokio::test]
async fn test_full_box_checking_run() {
    let store = ProcessStore::in_memory();
    let (session, notifier) = session(&store);
    let content = json!({
        "contentId": "c-1",
        "articleId": "a-1",
        "articleName": "Blue mug",
        "remainingQuantity": 6
    });
    let (warehouse, bodies) = Warehouse::new(
        Some(handling_unit("TO_BE_CHECKED")),
        vec![ok_reply(Value::Null), ok_reply(content)],
    );

    let mut box_stage = session.open(ScanBoxCheck::new(warehouse.clone())).unwrap();
    assert_eq!(
        box_stage.submit(CheckInput::scanned("HU123")).await.unwrap(),
        Transition::Committed
    );

    let mut article_stage = session.open(ScanArticleCheck::new(warehouse.clone())).unwrap();
    assert_eq!(session.current_step().unwrap(), SCAN_ARTICLE);

    let unknown = article_stage.submit(CheckInput::scanned("ZZZ")).await.unwrap();
    assert!(matches!(
        unknown,
        Transition::Rejected { rejection: Rejection::NotFound { .. }, .. }
    ));
    assert_eq!(
        notifier.last_key().as_deref(),
        Some("messages:no-article-or-feature")
    );

    assert_eq!(
        article_stage.submit(CheckInput::scanned("3760001")).await.unwrap(),
        Transition::Committed
    );
    assert_eq!(
        bodies.lock().unwrap().last(),
        Some(&json!({ "scannedInfo": "3760001", "handlingUnitId": "hu-1" }))
    );

    let mut quantity_stage = session.open(QuantityCheck).unwrap();
    let too_many = quantity_stage.submit(CheckInput::quantity(7)).await.unwrap();
    assert!(matches!(too_many, Transition::Rejected { .. }));
    assert_eq!(notifier.last_key().as_deref(), Some("messages:wrong-quantity"));
    assert_eq!(
        quantity_stage.submit(CheckInput::quantity(6)).await.unwrap(),
        Transition::Committed
    );

    let record = session.record().unwrap();
    assert_eq!(record.current_step(), ENTER_QUANTITY);
    assert_eq!(record.previous_step(ENTER_QUANTITY), Some(SCAN_ARTICLE));
    assert_eq!(record.previous_step(SCAN_ARTICLE), Some(SCAN_BOX));

    assert!(matches!(
        record.data(ENTER_QUANTITY),
        Some(BoxCheckingPayload::Quantity(checked)) if checked.quantity == 6
    ));

    session.finish().unwrap();
    assert!(store.get::<BoxChecking>().unwrap().is_empty());
}

#[tokio::test]
async fn test_flagged_article_error_rewinds_to_box_scan() {
    let store = ProcessStore::in_memory();
    let (session, notifier) = session(&store);
    let (warehouse, _) = Warehouse::new(
        Some(handling_unit("TO_BE_CHECKED")),
        vec![ProxyReply {
            status: 500,
            body: json!({
                "error": { "is_error": true, "code": "FAPI_000012", "message": "closed" }
            })
            .to_string(),
        }],
    );

    let mut box_stage = session.open(ScanBoxCheck::new(warehouse.clone())).unwrap();
    box_stage.submit(CheckInput::scanned("HU123")).await.unwrap();
    let mut article_stage = session.open(ScanArticleCheck::new(warehouse)).unwrap();

    let transition = article_stage.submit(CheckInput::scanned("3760001")).await.unwrap();

    assert_eq!(
        transition,
        Transition::Rejected {
            rejection: Rejection::Backend {
                code: "FAPI_000012".to_string(),
                key: "messages:box-closed-meanwhile".to_string(),
            },
            rewound_to: Some(SCAN_BOX),
        }
    );
    let keys: Vec<String> = notifier.notices().into_iter().map(|n| n.key).collect();
    assert_eq!(keys, ["messages:box-closed-meanwhile", STEP_REWOUND_KEY]);
    let record = session.record().unwrap();
    assert_eq!(record.current_step(), SCAN_BOX);
    assert!(record.data(SCAN_BOX).is_none());
    assert!(record.data(SCAN_ARTICLE).is_none());
    assert_eq!(record.previous_step(SCAN_ARTICLE), Some(SCAN_BOX));

    // The box stage follows the rewind and takes a new scan.
    let again = box_stage.submit(CheckInput::scanned("HU123")).await.unwrap();
    assert_eq!(again, Transition::Committed);
    assert!(session.record().unwrap().data(SCAN_BOX).is_some());
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Counted(u32);

impl StepPayload for Counted {
    fn step(&self) -> StepIndex {
        StepIndex::new(self.0)
    }
}

struct FiveSteps;

impl ProcessKind for FiveSteps {
    const NAME: &'static str = "cycleCount";
    type Payload = Counted;

    fn steps() -> &'static [StepIndex] {
        const STEPS: &[StepIndex] = &[
            StepIndex::new(1),
            StepIndex::new(2),
            StepIndex::new(3),
            StepIndex::new(4),
            StepIndex::new(5),
        ];
        STEPS
    }
}

#[test]
fn test_rewind_cleans_every_step_in_between() {
    let store = ProcessStore::in_memory();
    let session = Session::<FiveSteps>::new(store.clone());
    let step = |n: u32| session.controller(StepIndex::new(n)).unwrap();

    assert_ok!(step(1).enter());
    assert_ok!(store.commit_step::<FiveSteps>(StepIndex::new(1), Counted(1)));
    assert_ok!(step(2).enter());
    assert_ok!(store.commit_step::<FiveSteps>(StepIndex::new(2), Counted(2)));
    assert_ok!(step(3).enter_with_default(Counted(3)));
    assert_ok!(step(4).enter_with_default(Counted(4)));
    assert_ok!(step(5).enter());
    assert_ok!(store.commit_step::<FiveSteps>(StepIndex::new(5), Counted(5)));

    // A payload filed under the wrong step is refused.
    assert_err!(store.commit_step::<FiveSteps>(StepIndex::new(4), Counted(3)));

    let record = session.record().unwrap();
    assert_eq!(record.current_step(), StepIndex::new(5));
    assert_eq!(record.previous_step(StepIndex::new(5)), Some(StepIndex::new(2)));

    assert_eq!(step(5).back().unwrap(), Some(StepIndex::new(2)));

    let record = session.record().unwrap();
    assert_eq!(record.current_step(), StepIndex::new(2));
    assert_eq!(record.data(StepIndex::new(1)), Some(&Counted(1)));
    for n in 2..=5 {
        assert!(record.data(StepIndex::new(n)).is_none(), "step {n} kept data");
    }

    // Going back once more continues down the chain.
    assert_eq!(step(2).back().unwrap(), Some(StepIndex::new(1)));
    assert_eq!(session.current_step().unwrap(), StepIndex::new(1));

    // Walking forward again keeps the pointers stamped on the first pass.
    assert_ok!(step(2).enter());
    assert_ok!(step(5).enter());
    let record = session.record().unwrap();
    assert_eq!(record.previous_step(StepIndex::new(2)), Some(StepIndex::new(1)));
    assert_eq!(record.previous_step(StepIndex::new(5)), Some(StepIndex::new(2)));
}

#[tokio::test]
async fn test_file_backed_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (warehouse, _) = Warehouse::new(Some(handling_unit("TO_BE_CHECKED")), Vec::new());

    {
        let store = ProcessStore::new(FileStorage::open(dir.path()).unwrap());
        let (session, _) = session(&store);
        let mut stage = session.open(ScanBoxCheck::new(warehouse.clone())).unwrap();
        stage.submit(CheckInput::scanned("HU123")).await.unwrap();
    }

    let store = ProcessStore::new(FileStorage::open(dir.path()).unwrap());
    let (session, _) = session(&store);
    let stage = session.open(ScanBoxCheck::new(warehouse)).unwrap();
    assert!(stage.is_committed());
    assert!(session.record().unwrap().data(SCAN_BOX).is_some());

    std::fs::write(dir.path().join("boxChecking.json"), "{\"currentStep\":").unwrap();
    assert!(session.record().unwrap().is_empty());
}
