//! In-memory remote for tests and demos.

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{RemoteCategory, RemoteExpense, RemoteGateway};
use crate::http::{HttpRequest, HttpResponse, LoopbackServer, Method};
use crate::wire::{self, CategoryDto, ExpenseDto, ListEnvelope, MutationEnvelope};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use walletsync_core::{
    Category, CategoryKey, Expense, ExpenseKey, RemoteId, Timestamp, UserId,
};

/// Number of calls the mock received, per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayCalls {
    /// `create_expense` calls.
    pub create_expense: usize,
    /// `list_expenses` calls.
    pub list_expenses: usize,
    /// `update_expense` calls.
    pub update_expense: usize,
    /// `delete_expense` calls.
    pub delete_expense: usize,
    /// `create_category` calls.
    pub create_category: usize,
    /// `list_categories` calls.
    pub list_categories: usize,
    /// `update_category` calls.
    pub update_category: usize,
    /// `delete_category` calls.
    pub delete_category: usize,
}

impl GatewayCalls {
    /// Calls that change remote state.
    pub fn mutations(&self) -> usize {
        self.create_expense
            + self.update_expense
            + self.delete_expense
            + self.create_category
            + self.update_category
            + self.delete_category
    }

    /// All calls.
    pub fn total(&self) -> usize {
        self.mutations() + self.list_expenses + self.list_categories
    }
}

#[derive(Debug, Default)]
struct MockRemote {
    expenses: Vec<RemoteExpense>,
    categories: Vec<RemoteCategory>,
    failing_expenses: HashSet<ExpenseKey>,
    failing_categories: HashSet<CategoryKey>,
    reject_status: Option<u16>,
    lost_acks: usize,
    omit_ids: bool,
    fail_deletes: bool,
    fail_lists: bool,
    calls: GatewayCalls,
}

impl MockRemote {
    /// Completes a committed mutation, unless its acknowledgment is to be lost.
    fn ack<T>(&mut self, value: T) -> GatewayResult<T> {
        if self.lost_acks > 0 {
            self.lost_acks -= 1;
            return Err(GatewayError::Timeout);
        }
        Ok(value)
    }

    fn created(&mut self, id: RemoteId) -> GatewayResult<Option<RemoteId>> {
        let id = if self.omit_ids { None } else { Some(id) };
        self.ack(id)
    }

    fn check_expense(&self, content: &RemoteExpense) -> GatewayResult<()> {
        if self.failing_expenses.contains(&content.natural_key()) {
            return Err(injected(500));
        }
        Ok(())
    }

    fn check_category(&self, content: &RemoteCategory) -> GatewayResult<()> {
        if self.failing_categories.contains(&content.natural_key()) {
            return Err(injected(500));
        }
        Ok(())
    }

    fn create_expense(&mut self, mut content: RemoteExpense) -> GatewayResult<Option<RemoteId>> {
        self.check_expense(&content)?;
        content.remote_id = fresh_id();
        let id = content.remote_id.clone();
        self.expenses.push(content);
        self.created(id)
    }

    fn update_expense(&mut self, id: &RemoteId, mut content: RemoteExpense) -> GatewayResult<()> {
        self.check_expense(&content)?;
        let slot = self
            .expenses
            .iter_mut()
            .find(|e| &e.remote_id == id)
            .ok_or_else(|| not_found(id))?;
        content.remote_id = id.clone();
        *slot = content;
        self.ack(())
    }

    fn delete_expense(&mut self, id: &RemoteId, user: &UserId) -> GatewayResult<()> {
        if self.fail_deletes {
            return Err(injected(503));
        }
        let before = self.expenses.len();
        self.expenses
            .retain(|e| !(&e.remote_id == id && &e.user_id == user));
        if self.expenses.len() == before {
            return Err(not_found(id));
        }
        self.ack(())
    }

    fn create_category(&mut self, mut content: RemoteCategory) -> GatewayResult<Option<RemoteId>> {
        self.check_category(&content)?;
        content.remote_id = fresh_id();
        let id = content.remote_id.clone();
        self.categories.push(content);
        self.created(id)
    }

    fn update_category(&mut self, id: &RemoteId, mut content: RemoteCategory) -> GatewayResult<()> {
        self.check_category(&content)?;
        let slot = self
            .categories
            .iter_mut()
            .find(|c| &c.remote_id == id)
            .ok_or_else(|| not_found(id))?;
        content.remote_id = id.clone();
        *slot = content;
        self.ack(())
    }

    fn delete_category(&mut self, id: &RemoteId, user: &UserId) -> GatewayResult<()> {
        if self.fail_deletes {
            return Err(injected(503));
        }
        let before = self.categories.len();
        self.categories
            .retain(|c| !(&c.remote_id == id && &c.user_id == user));
        if self.categories.len() == before {
            return Err(not_found(id));
        }
        self.ack(())
    }

    fn list_expenses(&self, user: &UserId) -> GatewayResult<Vec<RemoteExpense>> {
        if self.fail_lists {
            return Err(injected(503));
        }
        Ok(self
            .expenses
            .iter()
            .filter(|e| &e.user_id == user)
            .cloned()
            .collect())
    }

    fn list_categories(&self, user: &UserId) -> GatewayResult<Vec<RemoteCategory>> {
        if self.fail_lists {
            return Err(injected(503));
        }
        Ok(self
            .categories
            .iter()
            .filter(|c| &c.user_id == user)
            .cloned()
            .collect())
    }
}

fn fresh_id() -> RemoteId {
    RemoteId::new(uuid::Uuid::new_v4().simple().to_string())
}

fn injected(status: u16) -> GatewayError {
    GatewayError::ServerRejected {
        status,
        body: "injected failure".into(),
    }
}

fn not_found(id: &RemoteId) -> GatewayError {
    GatewayError::ServerRejected {
        status: 404,
        body: format!("document {id} not found"),
    }
}

/// A [`RemoteGateway`] over an in-memory remote, with failure injection.
///
/// Like the real API, the mock does not deduplicate creates: pushing the same
/// record twice stores it twice.
#[derive(Debug)]
pub struct MockGateway {
    remote: Mutex<MockRemote>,
    reachable: AtomicBool,
    latency: Option<Duration>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// Creates a reachable, empty remote.
    pub fn new() -> Self {
        Self {
            remote: Mutex::new(MockRemote::default()),
            reachable: AtomicBool::new(true),
            latency: None,
        }
    }

    /// Delays every async call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes every call fail with `NetworkUnreachable` while `false`.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Returns whether calls currently reach the remote.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Rejects creates and updates of the expense with `key` with status 500.
    pub fn fail_expense(&self, key: ExpenseKey) {
        self.remote.lock().failing_expenses.insert(key);
    }

    /// Rejects creates and updates of the category with `key` with status 500.
    pub fn fail_category(&self, key: CategoryKey) {
        self.remote.lock().failing_categories.insert(key);
    }

    /// Clears every per-record failure.
    pub fn clear_failures(&self) {
        let mut remote = self.remote.lock();
        remote.failing_expenses.clear();
        remote.failing_categories.clear();
    }

    /// Rejects every call with `status`, or stops rejecting with `None`.
    pub fn reject_all(&self, status: Option<u16>) {
        self.remote.lock().reject_status = status;
    }

    /// The next `count` mutations commit but report [`GatewayError::Timeout`].
    pub fn lose_next_acks(&self, count: usize) {
        self.remote.lock().lost_acks = count;
    }

    /// Creates commit but acknowledge without an id.
    pub fn omit_ids_on_create(&self, omit: bool) {
        self.remote.lock().omit_ids = omit;
    }

    /// Deletes fail with status 503.
    pub fn fail_deletes(&self, fail: bool) {
        self.remote.lock().fail_deletes = fail;
    }

    /// Listings fail with status 503.
    pub fn fail_lists(&self, fail: bool) {
        self.remote.lock().fail_lists = fail;
    }

    /// Stores an expense directly, as another device would. Returns its id.
    pub fn seed_expense(&self, mut expense: RemoteExpense) -> RemoteId {
        if !expense.remote_id.is_assigned() {
            expense.remote_id = fresh_id();
        }
        let id = expense.remote_id.clone();
        self.remote.lock().expenses.push(expense);
        id
    }

    /// Stores a category directly, as another device would. Returns its id.
    pub fn seed_category(&self, mut category: RemoteCategory) -> RemoteId {
        if !category.remote_id.is_assigned() {
            category.remote_id = fresh_id();
        }
        let id = category.remote_id.clone();
        self.remote.lock().categories.push(category);
        id
    }

    /// Removes an expense directly, as another device would.
    pub fn remove_expense(&self, id: &RemoteId) -> bool {
        let mut remote = self.remote.lock();
        let before = remote.expenses.len();
        remote.expenses.retain(|e| &e.remote_id != id);
        remote.expenses.len() != before
    }

    /// Every stored expense of `user`, in creation order.
    pub fn remote_expenses(&self, user: &UserId) -> Vec<RemoteExpense> {
        let remote = self.remote.lock();
        remote
            .expenses
            .iter()
            .filter(|e| &e.user_id == user)
            .cloned()
            .collect()
    }

    /// Every stored category of `user`, in creation order.
    pub fn remote_categories(&self, user: &UserId) -> Vec<RemoteCategory> {
        let remote = self.remote.lock();
        remote
            .categories
            .iter()
            .filter(|c| &c.user_id == user)
            .cloned()
            .collect()
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> GatewayCalls {
        self.remote.lock().calls.clone()
    }

    /// Resets the call counters.
    pub fn reset_calls(&self) {
        self.remote.lock().calls = GatewayCalls::default();
    }

    /// Counts the call, then applies reachability and blanket rejection.
    fn begin(
        &self,
        count: impl FnOnce(&mut GatewayCalls),
    ) -> GatewayResult<MutexGuard<'_, MockRemote>> {
        let mut remote = self.remote.lock();
        count(&mut remote.calls);
        if !self.is_reachable() {
            return Err(GatewayError::unreachable("mock remote is offline"));
        }
        if let Some(status) = remote.reject_status {
            return Err(GatewayError::ServerRejected {
                status,
                body: "rejected by mock remote".into(),
            });
        }
        Ok(remote)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl RemoteGateway for MockGateway {
    async fn create_expense(&self, expense: &Expense) -> GatewayResult<Option<RemoteId>> {
        self.pause().await;
        let content = RemoteExpense::from_expense(expense, RemoteId::unassigned());
        self.begin(|c| c.create_expense += 1)?
            .create_expense(content)
    }

    async fn list_expenses(&self, user: &UserId) -> GatewayResult<Vec<RemoteExpense>> {
        self.pause().await;
        self.begin(|c| c.list_expenses += 1)?.list_expenses(user)
    }

    async fn update_expense(&self, remote_id: &RemoteId, expense: &Expense) -> GatewayResult<()> {
        self.pause().await;
        let content = RemoteExpense::from_expense(expense, remote_id.clone());
        self.begin(|c| c.update_expense += 1)?
            .update_expense(remote_id, content)
    }

    async fn delete_expense(&self, remote_id: &RemoteId, user: &UserId) -> GatewayResult<()> {
        self.pause().await;
        self.begin(|c| c.delete_expense += 1)?
            .delete_expense(remote_id, user)
    }

    async fn create_category(&self, category: &Category) -> GatewayResult<Option<RemoteId>> {
        self.pause().await;
        let content = RemoteCategory::from_category(category, RemoteId::unassigned());
        self.begin(|c| c.create_category += 1)?
            .create_category(content)
    }

    async fn list_categories(&self, user: &UserId) -> GatewayResult<Vec<RemoteCategory>> {
        self.pause().await;
        self.begin(|c| c.list_categories += 1)?.list_categories(user)
    }

    async fn update_category(
        &self,
        remote_id: &RemoteId,
        category: &Category,
    ) -> GatewayResult<()> {
        self.pause().await;
        let content = RemoteCategory::from_category(category, remote_id.clone());
        self.begin(|c| c.update_category += 1)?
            .update_category(remote_id, content)
    }

    async fn delete_category(&self, remote_id: &RemoteId, user: &UserId) -> GatewayResult<()> {
        self.pause().await;
        self.begin(|c| c.delete_category += 1)?
            .delete_category(remote_id, user)
    }
}

impl MockGateway {
    fn route(&self, request: &HttpRequest) -> GatewayResult<HttpResponse> {
        let parts: Vec<&str> = request.segments().iter().map(String::as_str).collect();
        match (request.method, parts.as_slice()) {
            (Method::Post, ["add-expense"]) => {
                let content = expense_body(request)?;
                let id = self.begin(|c| c.create_expense += 1)?.create_expense(content)?;
                created(id)
            }
            (Method::Get, ["get-expenses", user]) => {
                let rows = self
                    .begin(|c| c.list_expenses += 1)?
                    .list_expenses(&UserId::new(*user))?;
                HttpResponse::json(
                    200,
                    &ListEnvelope {
                        message: Some("Expenses retrieved".into()),
                        data: rows.iter().map(ExpenseDto::from).collect(),
                    },
                )
            }
            (Method::Put, ["update-expense", id]) => {
                let content = expense_body(request)?;
                self.begin(|c| c.update_expense += 1)?
                    .update_expense(&RemoteId::new(*id), content)?;
                message(200, "Expense updated")
            }
            (Method::Delete, ["delete-expense", id, user]) => {
                self.begin(|c| c.delete_expense += 1)?
                    .delete_expense(&RemoteId::new(*id), &UserId::new(*user))?;
                message(200, "Expense deleted")
            }
            (Method::Post, ["categories", "add"]) => {
                let content = category_body(request)?;
                let id = self.begin(|c| c.create_category += 1)?.create_category(content)?;
                created(id)
            }
            (Method::Get, ["get-categories", user]) => {
                let rows = self
                    .begin(|c| c.list_categories += 1)?
                    .list_categories(&UserId::new(*user))?;
                HttpResponse::json(
                    200,
                    &ListEnvelope {
                        message: Some("Categories retrieved".into()),
                        data: rows.iter().map(CategoryDto::from).collect(),
                    },
                )
            }
            (Method::Put, ["update-category", id]) => {
                let content = category_body(request)?;
                self.begin(|c| c.update_category += 1)?
                    .update_category(&RemoteId::new(*id), content)?;
                message(200, "Category updated")
            }
            (Method::Delete, ["delete-category", id, user]) => {
                self.begin(|c| c.delete_category += 1)?
                    .delete_category(&RemoteId::new(*id), &UserId::new(*user))?;
                message(200, "Category deleted")
            }
            _ => Ok(HttpResponse::new(404, "no such route")),
        }
    }
}

/// Serves the REST API from the same in-memory remote.
///
/// Gateway errors that carry a status become responses with that status;
/// unreachability and lost acknowledgments surface as transport errors.
impl LoopbackServer for MockGateway {
    fn handle(&self, request: &HttpRequest) -> GatewayResult<HttpResponse> {
        match self.route(request) {
            Err(GatewayError::ServerRejected { status, body }) => {
                Ok(HttpResponse::new(status, body.into_bytes()))
            }
            other => other,
        }
    }
}

fn created(id: Option<RemoteId>) -> GatewayResult<HttpResponse> {
    let envelope = MutationEnvelope {
        message: Some("Created".into()),
        id: id.map(|id| id.as_str().to_string()),
    };
    HttpResponse::json(201, &envelope)
}

fn message(status: u16, text: &str) -> GatewayResult<HttpResponse> {
    HttpResponse::json(
        status,
        &MutationEnvelope {
            message: Some(text.to_string()),
            id: None,
        },
    )
}

fn bad_request(reason: impl std::fmt::Display) -> GatewayError {
    GatewayError::ServerRejected {
        status: 400,
        body: reason.to_string(),
    }
}

/// Parses an expense request body; a malformed body answers 400.
fn expense_body(request: &HttpRequest) -> GatewayResult<RemoteExpense> {
    let dto: ExpenseDto = parse_body(request)?;
    let date = Timestamp::parse(&dto.date).map_err(bad_request)?;
    Ok(RemoteExpense {
        remote_id: RemoteId::unassigned(),
        store_name: dto.store_name,
        amount: dto.price,
        category: dto.category,
        date,
        user_id: UserId::new(dto.user_id),
        image_url: dto.image_url,
    })
}

/// Parses a category request body; a malformed body answers 400.
fn category_body(request: &HttpRequest) -> GatewayResult<RemoteCategory> {
    let dto: CategoryDto = parse_body(request)?;
    Ok(RemoteCategory {
        remote_id: RemoteId::unassigned(),
        name: dto.name,
        budget_limit: dto.budget_limit,
        user_id: UserId::new(dto.user_id),
    })
}

fn parse_body<T: serde::de::DeserializeOwned>(request: &HttpRequest) -> GatewayResult<T> {
    let body = request.body.as_deref().unwrap_or_default();
    wire::decode(body).map_err(bad_request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletsync_core::{Decimal, NewExpense, RecordStore};

    fn expense(store: &RecordStore, name: &str) -> Expense {
        store
            .insert_expense(NewExpense::new(
                UserId::new("u1"),
                name,
                Decimal::new(500, 2),
                "Food",
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn creates_are_not_deduplicated() {
        let store = RecordStore::open_in_memory().unwrap();
        let mock = MockGateway::new();
        let row = expense(&store, "Mart");

        let a = mock.create_expense(&row).await.unwrap().unwrap();
        let b = mock.create_expense(&row).await.unwrap().unwrap();
        assert_ne!(a, b);
        assert_eq!(mock.remote_expenses(&row.user_id).len(), 2);
        assert_eq!(mock.calls().create_expense, 2);
    }

    #[tokio::test]
    async fn lost_ack_commits_then_times_out() {
        let store = RecordStore::open_in_memory().unwrap();
        let mock = MockGateway::new();
        mock.lose_next_acks(1);
        let row = expense(&store, "Mart");

        assert_eq!(mock.create_expense(&row).await, Err(GatewayError::Timeout));
        assert_eq!(mock.remote_expenses(&row.user_id).len(), 1);
        assert!(mock.create_expense(&row).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn offline_calls_are_counted_and_fail() {
        let mock = MockGateway::new();
        mock.set_reachable(false);
        let err = mock.list_categories(&UserId::new("u1")).await.unwrap_err();
        assert!(matches!(err, GatewayError::NetworkUnreachable(_)));
        assert_eq!(mock.calls().list_categories, 1);
        assert_eq!(mock.calls().mutations(), 0);
    }

    #[tokio::test]
    async fn injected_key_failure_only_hits_that_record() {
        let store = RecordStore::open_in_memory().unwrap();
        let mock = MockGateway::new();
        let bad = expense(&store, "Bad");
        let good = expense(&store, "Good");
        mock.fail_expense(bad.natural_key());

        assert!(matches!(
            mock.create_expense(&bad).await,
            Err(GatewayError::ServerRejected { status: 500, .. })
        ));
        assert!(mock.create_expense(&good).await.is_ok());
    }

    #[test]
    fn unknown_route_is_404() {
        let mock = MockGateway::new();
        let response = mock
            .handle(
                &HttpRequest::new(
                    Method::Get,
                    &url::Url::parse("http://mock").unwrap(),
                    &["nope"],
                    None,
                )
                .unwrap(),
            )
            .unwrap();
        assert_eq!(response.status, 404);
    }
}
