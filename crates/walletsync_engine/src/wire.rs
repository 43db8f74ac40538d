//! JSON bodies exchanged with the REST API.
//!
//! Field names follow the API: camelCase, except `userID`. Prices and budget
//! limits travel as JSON numbers.

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{RemoteCategory, RemoteExpense};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use walletsync_core::{Category, Decimal, Expense, RemoteId, Timestamp, UserId};

/// Expense body, used both for requests and inside list envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseDto {
    /// Remote id; the sentinel on create.
    #[serde(default)]
    pub document_id: Option<String>,
    /// Merchant name.
    pub store_name: String,
    /// Amount spent.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Category label.
    pub category: String,
    /// ISO-8601 creation time.
    pub date: String,
    /// Owning user.
    #[serde(rename = "userID")]
    pub user_id: String,
    /// Optional image reference.
    #[serde(default)]
    pub image_url: Option<String>,
}

impl ExpenseDto {
    /// Body for a create or update of `expense`.
    pub fn from_expense(expense: &Expense) -> Self {
        Self {
            document_id: Some(expense.remote_id.as_str().to_string()),
            store_name: expense.store_name.clone(),
            price: expense.amount,
            category: expense.category.clone(),
            date: expense.date.to_iso(),
            user_id: expense.user_id.as_str().to_string(),
            image_url: expense.image_url.clone(),
        }
    }

    /// Converts a listed expense, which must carry an assigned id.
    pub fn into_remote(self) -> GatewayResult<RemoteExpense> {
        let remote_id = assigned_id(self.document_id, "expense")?;
        let date = Timestamp::parse(&self.date).map_err(|e| {
            GatewayError::protocol(format!("expense {remote_id}: bad date '{}': {e}", self.date))
        })?;
        Ok(RemoteExpense {
            remote_id,
            store_name: self.store_name,
            amount: self.price,
            category: self.category,
            date,
            user_id: UserId::new(self.user_id),
            image_url: self.image_url.filter(|url| !url.trim().is_empty()),
        })
    }
}

impl From<&RemoteExpense> for ExpenseDto {
    fn from(remote: &RemoteExpense) -> Self {
        Self {
            document_id: Some(remote.remote_id.as_str().to_string()),
            store_name: remote.store_name.clone(),
            price: remote.amount,
            category: remote.category.clone(),
            date: remote.date.to_iso(),
            user_id: remote.user_id.as_str().to_string(),
            image_url: remote.image_url.clone(),
        }
    }
}

/// Category body, used both for requests and inside list envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDto {
    /// Remote id; the sentinel on create.
    #[serde(default)]
    pub document_id: Option<String>,
    /// Category name.
    pub name: String,
    /// Budget limit.
    #[serde(with = "rust_decimal::serde::float")]
    pub budget_limit: Decimal,
    /// Owning user.
    #[serde(rename = "userID")]
    pub user_id: String,
}

impl CategoryDto {
    /// Body for a create or update of `category`.
    pub fn from_category(category: &Category) -> Self {
        Self {
            document_id: Some(category.remote_id.as_str().to_string()),
            name: category.name.clone(),
            budget_limit: category.budget_limit,
            user_id: category.user_id.as_str().to_string(),
        }
    }

    /// Converts a listed category, which must carry an assigned id.
    pub fn into_remote(self) -> GatewayResult<RemoteCategory> {
        Ok(RemoteCategory {
            remote_id: assigned_id(self.document_id, "category")?,
            name: self.name,
            budget_limit: self.budget_limit,
            user_id: UserId::new(self.user_id),
        })
    }
}

impl From<&RemoteCategory> for CategoryDto {
    fn from(remote: &RemoteCategory) -> Self {
        Self {
            document_id: Some(remote.remote_id.as_str().to_string()),
            name: remote.name.clone(),
            budget_limit: remote.budget_limit,
            user_id: remote.user_id.as_str().to_string(),
        }
    }
}

/// `{ message, data: [...] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEnvelope<T> {
    /// Informational message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Listed records.
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// `{ message, id? }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationEnvelope {
    /// Informational message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Id assigned by a create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl MutationEnvelope {
    /// The assigned id, if the remote returned a usable one.
    pub fn remote_id(&self) -> Option<RemoteId> {
        self.id
            .as_deref()
            .map(str::trim)
            .map(RemoteId::new)
            .filter(RemoteId::is_assigned)
    }
}

/// Serializes a request body.
pub fn encode<T: Serialize>(value: &T) -> GatewayResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| GatewayError::protocol(format!("encode: {e}")))
}

/// Parses a response body.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> GatewayResult<T> {
    serde_json::from_slice(body).map_err(|e| GatewayError::protocol(format!("decode: {e}")))
}

/// Parses a mutation response. An empty body is an acknowledgment without id.
pub fn decode_mutation(body: &[u8]) -> GatewayResult<MutationEnvelope> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(MutationEnvelope::default());
    }
    decode(body)
}

fn assigned_id(document_id: Option<String>, kind: &str) -> GatewayResult<RemoteId> {
    document_id
        .map(RemoteId::new)
        .filter(RemoteId::is_assigned)
        .ok_or_else(|| GatewayError::protocol(format!("listed {kind} has no documentId")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expense_listing_parses() {
        let body = br#"{
            "message": "ok",
            "data": [{
                "documentId": "abc",
                "storeName": "Mart",
                "price": 12.5,
                "category": "Food",
                "date": "2024-07-04T10:00:00.000Z",
                "userID": "u1",
                "imageUrl": null,
                "isSynced": true
            }]
        }"#;
        let envelope: ListEnvelope<ExpenseDto> = decode(body).unwrap();
        let remote = envelope.data.into_iter().next().unwrap().into_remote().unwrap();
        assert_eq!(remote.remote_id, RemoteId::new("abc"));
        assert_eq!(remote.amount, Decimal::new(125, 1));
        assert_eq!(remote.date.to_iso(), "2024-07-04T10:00:00.000Z");
        assert!(remote.image_url.is_none());
    }

    #[test]
    fn listing_without_id_is_a_protocol_error() {
        let dto = CategoryDto {
            document_id: Some("0".into()),
            name: "Food".into(),
            budget_limit: Decimal::new(100, 0),
            user_id: "u1".into(),
        };
        assert!(matches!(dto.into_remote(), Err(GatewayError::Protocol(_))));
    }

    #[test]
    fn bad_date_is_a_protocol_error() {
        let body = br#"{"documentId":"x","storeName":"S","price":1,"category":"C","date":"yesterday","userID":"u"}"#;
        let dto: ExpenseDto = decode(body).unwrap();
        assert!(matches!(dto.into_remote(), Err(GatewayError::Protocol(_))));
    }

    #[test]
    fn request_body_uses_api_field_names() {
        let dto = CategoryDto {
            document_id: Some("0".into()),
            name: "Rent".into(),
            budget_limit: Decimal::new(1500, 0),
            user_id: "u9".into(),
        };
        let json: serde_json::Value = serde_json::from_slice(&encode(&dto).unwrap()).unwrap();
        assert_eq!(json["userID"], "u9");
        assert_eq!(json["budgetLimit"], 1500.0);
        assert_eq!(json["documentId"], "0");
    }

    #[test]
    fn mutation_ids() {
        assert!(decode_mutation(b"").unwrap().remote_id().is_none());
        let ack = decode_mutation(br#"{"message":"created","id":"doc-1"}"#).unwrap();
        assert_eq!(ack.remote_id(), Some(RemoteId::new("doc-1")));
        let sentinel = decode_mutation(br#"{"id":"0"}"#).unwrap();
        assert!(sentinel.remote_id().is_none());
        assert!(decode_mutation(b"<html>").is_err());
    }
}
