use async_trait::async_trait;
use inventory_assistant::assistant::{AnswerSource, AssistantFacade, AssistantResponse, Stage};
use inventory_assistant::config::AssistantConfig;
use inventory_assistant::db::{AuditRecord, AuditSink, ExecutionError, QueryStore, Row};
use inventory_assistant::error::{AssistantError, Result};
use inventory_assistant::llm::{ChatMessage, CompletionService};
use inventory_assistant::schema_context::SchemaContext;
use inventory_assistant::security::query_guards::QueryGuards;
use inventory_assistant::security::scope::RestrictionDescriptor;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ACME_SQL: &str = "SELECT o.id, l.name AS supplier, SUM(oi.quantity * oi.unit_price) AS total \
FROM orders o JOIN locations l ON l.id = o.origin_location_id \
JOIN order_items oi ON oi.order_id = o.id \
WHERE o.order_type = 'purchase' AND l.name ILIKE '%Acme%' GROUP BY o.id, l.name LIMIT 50";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Persona {
    Translator,
    Composer,
    Fallback,
    Reinforcement,
}

fn persona_of(messages: &[ChatMessage]) -> Persona {
    let system = &messages[0].content;
    if system.starts_with("You are a PostgreSQL expert") {
        Persona::Translator
    } else if system.starts_with("You are a business analyst") {
        Persona::Composer
    } else if system.starts_with("You are the assistant of an inventory") {
        Persona::Fallback
    } else {
        Persona::Reinforcement
    }
}

/// Completion service driven by per-persona scripts.
struct ScriptedLlm {
    probe_ok: AtomicBool,
    translation: Mutex<Result<String>>,
    composition_fails: AtomicBool,
    fallback_fails: AtomicBool,
    fallback_blank: AtomicBool,
    reinforcement_fails: AtomicBool,
    calls: Mutex<Vec<(Persona, Vec<ChatMessage>)>>,
}

impl ScriptedLlm {
    fn translating_to(reply: &str) -> Self {
        Self {
            probe_ok: AtomicBool::new(true),
            translation: Mutex::new(Ok(reply.to_string())),
            composition_fails: AtomicBool::new(false),
            fallback_fails: AtomicBool::new(false),
            fallback_blank: AtomicBool::new(false),
            reinforcement_fails: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls_to(&self, persona: Persona) -> Vec<Vec<ChatMessage>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == persona)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn copy_result(result: &Result<String>) -> Result<String> {
    match result {
        Ok(text) => Ok(text.clone()),
        Err(e) => Err(AssistantError::Llm(e.to_string())),
    }
}

#[async_trait]
impl CompletionService for ScriptedLlm {
    async fn chat(&self, messages: &[ChatMessage], _temperature: f32, _max_tokens: u32) -> Result<String> {
        let persona = persona_of(messages);
        self.calls.lock().unwrap().push((persona, messages.to_vec()));
        let user = &messages[messages.len() - 1].content;

        match persona {
            Persona::Translator => copy_result(&self.translation.lock().unwrap()),
            Persona::Composer => {
                if self.composition_fails.load(Ordering::SeqCst) {
                    return Err(AssistantError::Llm("upstream 502".to_string()));
                }
                if user.contains("could not be run") {
                    Ok("No encontré ese dato. Prueba a indicar el nombre exacto del proveedor.".to_string())
                } else if user.contains("Acme") {
                    Ok("El proveedor Acme tiene 3 pedidos por un total de 4500.".to_string())
                } else {
                    Ok("No hubo movimientos en el periodo consultado.".to_string())
                }
            }
            Persona::Fallback => {
                if self.fallback_fails.load(Ordering::SeqCst) {
                    Err(AssistantError::Llm("connection reset".to_string()))
                } else if self.fallback_blank.load(Ordering::SeqCst) {
                    Ok("   ".to_string())
                } else {
                    Ok("Puedo ayudarte con pedidos, inventario, ventas y entregas.".to_string())
                }
            }
            Persona::Reinforcement => {
                if self.reinforcement_fails.load(Ordering::SeqCst) {
                    Err(AssistantError::Llm("rate limited".to_string()))
                } else {
                    Ok("ok".to_string())
                }
            }
        }
    }

    async fn probe(&self) -> Result<()> {
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AssistantError::Llm("connection refused".to_string()))
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

struct ScriptedStore {
    result: std::result::Result<Vec<Row>, ExecutionError>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedStore {
    fn returning(result: std::result::Result<Vec<Row>, ExecutionError>) -> Self {
        Self { result, executed: Mutex::new(Vec::new()) }
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryStore for ScriptedStore {
    async fn execute(&self, query: &str) -> std::result::Result<Vec<Row>, ExecutionError> {
        self.executed.lock().unwrap().push(query.to_string());
        self.result.clone()
    }
}

#[derive(Default)]
struct MemoryAudit {
    fail: bool,
    attempts: AtomicUsize,
    records: Mutex<Vec<AuditRecord>>,
}

#[async_trait]
impl AuditSink for MemoryAudit {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AssistantError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// The text the store receives for `sql` once it passed validation.
fn rendered(sql: &str) -> String {
    let schema = SchemaContext::inventory();
    QueryGuards::new(&schema)
        .validate(sql, RestrictionDescriptor::Unrestricted)
        .unwrap()
        .as_str()
        .to_string()
}

fn acme_rows() -> Vec<Row> {
    [
        json!({"id": 11, "supplier": "Acme", "total": 1500.0}),
        json!({"id": 12, "supplier": "Acme", "total": 2000.0}),
        json!({"id": 13, "supplier": "Acme", "total": 1000.0}),
    ]
    .into_iter()
    .map(|v| v.as_object().cloned().unwrap())
    .collect()
}

struct Harness {
    assistant: AssistantFacade,
    llm: Arc<ScriptedLlm>,
    store: Arc<ScriptedStore>,
    audit: Arc<MemoryAudit>,
}

async fn harness(llm: ScriptedLlm, store: ScriptedStore, audit: MemoryAudit) -> Harness {
    let llm = Arc::new(llm);
    let store = Arc::new(store);
    let audit = Arc::new(audit);
    let assistant = AssistantFacade::new(llm.clone(), store.clone(), audit.clone(), &AssistantConfig::default());
    assistant.initialize().await;
    Harness { assistant, llm, store, audit }
}

async fn wait_for_attempts(audit: &MemoryAudit, expected: usize) {
    for _ in 0..100 {
        if audit.attempts.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn assert_well_formed(response: &AssistantResponse) {
    if response.success {
        assert!(response.answer.is_some());
        assert!(response.source.is_some());
        assert!(response.error.is_none());
    } else {
        assert!(response.answer.is_none());
        assert!(response.source.is_none());
        assert!(response.error.as_deref().map_or(false, |e| !e.is_empty()));
    }
}

#[tokio::test]
async fn test_supplier_orders_answered_from_sql() {
    let h = harness(
        ScriptedLlm::translating_to(ACME_SQL),
        ScriptedStore::returning(Ok(acme_rows())),
        MemoryAudit::default(),
    )
    .await;

    let outcome = h
        .assistant
        .ask_with_trace("Muestra los pedidos del proveedor Acme", "admin", None)
        .await;
    let response = outcome.response;
    outcome
        .reinforcement
        .expect("rows were returned, so reinforcement starts")
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.source, Some(AnswerSource::Sql));
    let answer = response.answer.unwrap();
    assert!(answer.contains("Acme"));
    assert!(answer.contains('3'));
    assert_eq!(
        outcome.stages,
        [Stage::ReceivedQuestion, Stage::Translating, Stage::SqlPath, Stage::Composing, Stage::Done]
    );

    assert_eq!(h.store.executed(), [rendered(ACME_SQL)]);
    let composer_calls = h.llm.calls_to(Persona::Composer);
    assert_eq!(composer_calls.len(), 1);
    assert!(composer_calls[0][1].content.contains(r#""supplier":"Acme""#));

    // The task was awaited above, so the record is already there.
    let records = h.audit.records.lock().unwrap().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].question, "Muestra los pedidos del proveedor Acme");
    assert_eq!(records[0].query, rendered(ACME_SQL));
}

#[tokio::test]
async fn test_commented_query_reaches_store_without_comment() {
    let h = harness(
        ScriptedLlm::translating_to("SELECT COUNT(*) AS articles FROM articles; -- total articles"),
        ScriptedStore::returning(Ok(vec![json!({"articles": 12}).as_object().cloned().unwrap()])),
        MemoryAudit::default(),
    )
    .await;

    let response = h.assistant.ask("¿Cuántos artículos tenemos?", "admin", None).await;

    assert!(response.success);
    let executed = h.store.executed();
    assert_eq!(executed, ["SELECT COUNT(*) AS articles FROM articles".to_string()]);
    assert!(!executed[0].contains("--"));
}

#[tokio::test]
async fn test_store_error_is_rephrased_not_leaked() {
    let h = harness(
        ScriptedLlm::translating_to("SELECT o.discount FROM orders o LIMIT 10"),
        ScriptedStore::returning(Err(ExecutionError::Store(
            "column o.discount does not exist".to_string(),
        ))),
        MemoryAudit::default(),
    )
    .await;

    let outcome = h.assistant.ask_with_trace("¿Qué descuentos hicimos?", "admin", None).await;
    let response = outcome.response;

    assert!(!response.success);
    let error = response.error.clone().unwrap();
    assert!(error.contains("nombre exacto"));
    assert!(!error.contains("does not exist"));
    assert_well_formed(&response);
    assert!(outcome.stages.contains(&Stage::Composing));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.audit.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_guard_rejection_still_reaches_composing() {
    let h = harness(
        ScriptedLlm::translating_to("DELETE FROM orders WHERE status = 'cancelled'"),
        ScriptedStore::returning(Ok(acme_rows())),
        MemoryAudit::default(),
    )
    .await;

    let outcome = h.assistant.ask_with_trace("Borra los pedidos cancelados", "admin", None).await;

    assert!(h.store.executed().is_empty());
    assert!(outcome.stages.contains(&Stage::Composing));
    assert!(!outcome.response.success);
    assert_well_formed(&outcome.response);
}

#[tokio::test]
async fn test_scoped_caller_restriction_reaches_prompt_and_guard() {
    let h = harness(
        ScriptedLlm::translating_to("SELECT SUM(i.quantity) AS units FROM inventory i"),
        ScriptedStore::returning(Ok(acme_rows())),
        MemoryAudit::default(),
    )
    .await;

    let outcome = h.assistant.ask_with_trace("¿Cuántas unidades tengo?", "owner", Some(7)).await;

    let translator_calls = h.llm.calls_to(Persona::Translator);
    assert!(translator_calls[0][0].content.contains("inventory.location_id = 7"));
    assert!(h.store.executed().is_empty(), "unfiltered query must not run");
    assert!(outcome.stages.contains(&Stage::Composing));
    assert!(!outcome.response.success);
}

#[tokio::test]
async fn test_scoped_caller_with_filter_runs() {
    let sql = "SELECT SUM(i.quantity) AS units FROM inventory i WHERE i.location_id = 7";
    let h = harness(
        ScriptedLlm::translating_to(sql),
        ScriptedStore::returning(Ok(vec![json!({"units": 40}).as_object().cloned().unwrap()])),
        MemoryAudit::default(),
    )
    .await;

    let response = h.assistant.ask("¿Cuántas unidades tengo?", "supplier", Some(7)).await;

    assert!(response.success);
    assert_eq!(h.store.executed(), [rendered(sql)]);
}

#[tokio::test]
async fn test_capability_question_answered_directly() {
    let h = harness(
        ScriptedLlm::translating_to("CANNOT_TRANSLATE: the question asks about the assistant itself"),
        ScriptedStore::returning(Ok(acme_rows())),
        MemoryAudit::default(),
    )
    .await;

    let outcome = h.assistant.ask_with_trace("¿Qué puedes hacer?", "employee", None).await;

    assert!(outcome.response.success);
    assert_eq!(outcome.response.source, Some(AnswerSource::Direct));
    assert!(outcome.stages.contains(&Stage::FallbackPath));
    assert!(!outcome.stages.contains(&Stage::Composing));
    assert!(h.store.executed().is_empty());
}

#[tokio::test]
async fn test_translation_service_failure_degrades_to_direct_answer() {
    let llm = ScriptedLlm::translating_to("");
    *llm.translation.lock().unwrap() = Err(AssistantError::Llm("timeout talking to provider".to_string()));
    let h = harness(llm, ScriptedStore::returning(Ok(acme_rows())), MemoryAudit::default()).await;

    let response = h.assistant.ask("¿Cómo van las ventas?", "admin", None).await;

    assert!(response.success);
    assert_eq!(response.source, Some(AnswerSource::Direct));
    assert_eq!(h.llm.calls_to(Persona::Fallback).len(), 1);
}

#[tokio::test]
async fn test_fallback_service_failure_is_generic_error() {
    let llm = ScriptedLlm::translating_to("CANNOT_TRANSLATE: not a data question");
    llm.fallback_fails.store(true, Ordering::SeqCst);
    let h = harness(llm, ScriptedStore::returning(Ok(vec![])), MemoryAudit::default()).await;

    let response = h.assistant.ask("Hola", "admin", None).await;

    assert!(!response.success);
    assert!(!response.error.clone().unwrap().contains("connection reset"));
    assert_well_formed(&response);
}

#[tokio::test]
async fn test_blank_direct_answer_is_not_a_success() {
    let llm = ScriptedLlm::translating_to("CANNOT_TRANSLATE: not a data question");
    llm.fallback_blank.store(true, Ordering::SeqCst);
    let h = harness(llm, ScriptedStore::returning(Ok(vec![])), MemoryAudit::default()).await;

    let outcome = h.assistant.ask_with_trace("Hola", "admin", None).await;

    assert!(outcome.stages.contains(&Stage::FallbackPath));
    assert!(!outcome.response.success);
    assert_well_formed(&outcome.response);
}

#[tokio::test]
async fn test_composition_failure_is_reported() {
    let llm = ScriptedLlm::translating_to(ACME_SQL);
    llm.composition_fails.store(true, Ordering::SeqCst);
    let h = harness(llm, ScriptedStore::returning(Ok(acme_rows())), MemoryAudit::default()).await;

    let response = h.assistant.ask("Muestra los pedidos del proveedor Acme", "admin", None).await;

    assert!(!response.success);
    assert!(!response.error.clone().unwrap().contains("502"));
    assert_well_formed(&response);
}

#[tokio::test]
async fn test_empty_result_is_explained_without_reinforcement() {
    let h = harness(
        ScriptedLlm::translating_to("SELECT o.id FROM orders o WHERE o.created_at >= CURRENT_DATE LIMIT 50"),
        ScriptedStore::returning(Ok(vec![])),
        MemoryAudit::default(),
    )
    .await;

    let outcome = h.assistant.ask_with_trace("¿Qué pedidos entraron hoy?", "admin", None).await;
    assert!(outcome.reinforcement.is_none());
    let response = outcome.response;

    assert!(response.success);
    assert_eq!(response.source, Some(AnswerSource::Sql));
    let composer_calls = h.llm.calls_to(Persona::Composer);
    assert!(composer_calls[0][1].content.contains("NO_RESULTS"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.llm.calls_to(Persona::Reinforcement).is_empty());
    assert_eq!(h.audit.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reinforcement_failure_does_not_change_response() {
    let baseline = harness(
        ScriptedLlm::translating_to(ACME_SQL),
        ScriptedStore::returning(Ok(acme_rows())),
        MemoryAudit::default(),
    )
    .await;
    let expected = baseline.assistant.ask("Muestra los pedidos del proveedor Acme", "admin", None).await;

    let llm = ScriptedLlm::translating_to(ACME_SQL);
    llm.reinforcement_fails.store(true, Ordering::SeqCst);
    let failing = harness(
        llm,
        ScriptedStore::returning(Ok(acme_rows())),
        MemoryAudit { fail: true, ..Default::default() },
    )
    .await;
    let response = failing.assistant.ask("Muestra los pedidos del proveedor Acme", "admin", None).await;

    wait_for_attempts(&failing.audit, 1).await;
    assert_eq!(failing.audit.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(failing.llm.calls_to(Persona::Reinforcement).len(), 1);
    assert_eq!(response, expected);
    assert!(response.success);
}

#[tokio::test]
async fn test_repeated_question_keeps_response_shape() {
    let h = harness(
        ScriptedLlm::translating_to(ACME_SQL),
        ScriptedStore::returning(Ok(acme_rows())),
        MemoryAudit::default(),
    )
    .await;

    let first = h.assistant.ask("Muestra los pedidos del proveedor Acme", "admin", None).await;
    let second = h.assistant.ask("Muestra los pedidos del proveedor Acme", "admin", None).await;

    for response in [&first, &second] {
        assert_well_formed(response);
    }
    assert_eq!(first.success, second.success);
    assert_eq!(first.source, second.source);
    assert_eq!(first.answer.is_some(), second.answer.is_some());
    assert_eq!(first.error.is_some(), second.error.is_some());
}

#[tokio::test]
async fn test_failed_probe_blocks_questions_until_ready() {
    let llm = ScriptedLlm::translating_to(ACME_SQL);
    llm.probe_ok.store(false, Ordering::SeqCst);
    let h = harness(llm, ScriptedStore::returning(Ok(acme_rows())), MemoryAudit::default()).await;

    assert!(!h.assistant.status().await.ready);
    for _ in 0..3 {
        let response = h.assistant.ask("Muestra los pedidos del proveedor Acme", "admin", None).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("not available"));
    }
    assert_eq!(h.llm.total_calls(), 0);
    assert!(h.store.executed().is_empty());

    assert!(!h.assistant.check_ready().await);

    h.llm.probe_ok.store(true, Ordering::SeqCst);
    assert!(h.assistant.check_ready().await);
    assert!(h.assistant.status().await.ready);

    let response = h.assistant.ask("Muestra los pedidos del proveedor Acme", "admin", None).await;
    assert!(response.success);
}

#[tokio::test]
async fn test_uninitialized_assistant_refuses_questions() {
    let llm = Arc::new(ScriptedLlm::translating_to(ACME_SQL));
    let store = Arc::new(ScriptedStore::returning(Ok(acme_rows())));
    let assistant = AssistantFacade::new(
        llm.clone(),
        store,
        Arc::new(MemoryAudit::default()),
        &AssistantConfig::default(),
    );

    let response = assistant.ask("Muestra los pedidos del proveedor Acme", "admin", None).await;
    assert!(!response.success);
    assert_eq!(llm.total_calls(), 0);
}

#[tokio::test]
async fn test_blank_question_needs_no_round_trip() {
    let h = harness(
        ScriptedLlm::translating_to(ACME_SQL),
        ScriptedStore::returning(Ok(acme_rows())),
        MemoryAudit::default(),
    )
    .await;

    let response = h.assistant.ask("   ", "admin", None).await;
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Please write a question."));
    assert_eq!(h.llm.total_calls(), 0);
}
