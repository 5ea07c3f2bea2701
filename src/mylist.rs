//! Editing the user's mylists.
//!
//! The listing endpoint returns every list plus one shared `mylist_works`
//! array; each list refers to its works by index into that array, and the
//! indices arrive as strings or numbers. Item edits address works by their
//! position inside the list, not by id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Endpoints;
use crate::domain::ItemId;
use crate::error::ManagerError;
use crate::http::{handle_status, send_with_retries};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mylist {
    pub id: String,
    pub name: String,
    pub creation_date: String,
    pub item_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MylistsResponse {
    mylists: Vec<MylistEntry>,
    #[serde(default)]
    mylist_works: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MylistEntry {
    id: Value,
    mylist_name: String,
    #[serde(default)]
    insert_date: String,
    #[serde(default)]
    mylist_work_id: Vec<Value>,
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn value_to_index(value: &Value) -> Option<usize> {
    match value {
        Value::String(text) => text.trim().parse().ok(),
        Value::Number(number) => number.as_u64().and_then(|index| usize::try_from(index).ok()),
        _ => None,
    }
}

/// Turns the listing response into lists of work ids.
pub fn resolve_lists(body: Value) -> Result<Vec<Mylist>, ManagerError> {
    let response: MylistsResponse =
        serde_json::from_value(body).map_err(|err| ManagerError::Mylist(err.to_string()))?;
    response
        .mylists
        .into_iter()
        .map(|entry| {
            let item_ids = entry
                .mylist_work_id
                .iter()
                .map(|raw| {
                    value_to_index(raw)
                        .and_then(|index| response.mylist_works.get(index))
                        .cloned()
                        .ok_or_else(|| {
                            ManagerError::Mylist(format!("dangling work index {raw}"))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Mylist {
                id: value_to_string(&entry.id),
                name: entry.mylist_name,
                creation_date: entry.insert_date,
                item_ids,
            })
        })
        .collect()
}

/// Positions in `current` for each entry of `new_order`. `None` when the order
/// is unchanged; an error unless `new_order` is a permutation of `current`.
pub fn reorder_indices(
    current: &[String],
    new_order: &[String],
) -> Result<Option<Vec<usize>>, ManagerError> {
    if current.len() != new_order.len() {
        return Err(ManagerError::Mylist(format!(
            "new order has {} items but the list has {}",
            new_order.len(),
            current.len()
        )));
    }
    if current == new_order {
        return Ok(None);
    }
    let mut used = vec![false; current.len()];
    let mut indices = Vec::with_capacity(new_order.len());
    for item in new_order {
        let index = current
            .iter()
            .enumerate()
            .position(|(index, existing)| !used[index] && existing == item)
            .ok_or_else(|| {
                ManagerError::Mylist(format!("{item} is not part of the current list"))
            })?;
        used[index] = true;
        indices.push(index);
    }
    Ok(Some(indices))
}

pub struct MylistEditor {
    session: Session,
    endpoints: Endpoints,
}

impl MylistEditor {
    pub fn new(session: Session, endpoints: Endpoints) -> Self {
        Self { session, endpoints }
    }

    pub fn lists(&self) -> Result<Vec<Mylist>, ManagerError> {
        let response = send_with_retries(|| self.session.client().get(&self.endpoints.mylists))?;
        let body: Value = handle_status(response)?
            .json()
            .map_err(|err| ManagerError::Mylist(err.to_string()))?;
        resolve_lists(body)
    }

    pub fn find_by_id(&self, list_id: &str) -> Result<Mylist, ManagerError> {
        self.lists()?
            .into_iter()
            .find(|list| list.id == list_id)
            .ok_or_else(|| ManagerError::ListNotFound(list_id.to_string()))
    }

    pub fn find_by_name(&self, name: &str) -> Result<Vec<Mylist>, ManagerError> {
        Ok(self
            .lists()?
            .into_iter()
            .filter(|list| list.name == name)
            .collect())
    }

    /// Looks a list up by id, then by name.
    pub fn resolve(&self, list: &str) -> Result<Mylist, ManagerError> {
        let lists = self.lists()?;
        let found = lists
            .iter()
            .find(|candidate| candidate.id == list)
            .or_else(|| lists.iter().find(|candidate| candidate.name == list))
            .cloned();
        found.ok_or_else(|| ManagerError::ListNotFound(list.to_string()))
    }

    /// Returns the id of the new list.
    pub fn create(&self, name: &str) -> Result<String, ManagerError> {
        let body = self.post(
            &self.endpoints.mylist_update,
            &[("type", "create"), ("mylist_name", name)],
        )?;
        let id = body.get("mylist_id").map(value_to_string).unwrap_or_default();
        info!(list = %id, name, "created mylist");
        Ok(id)
    }

    pub fn rename(&self, list_id: &str, name: &str) -> Result<(), ManagerError> {
        self.post(
            &self.endpoints.mylist_update,
            &[("type", "rename"), ("mylist_id", list_id), ("mylist_name", name)],
        )?;
        Ok(())
    }

    pub fn delete_list(&self, list_id: &str) -> Result<(), ManagerError> {
        self.post(
            &self.endpoints.mylist_update,
            &[("type", "delete"), ("mylist_id", list_id)],
        )?;
        Ok(())
    }

    pub fn add_item(&self, list_id: &str, item: &ItemId) -> Result<(), ManagerError> {
        self.post(
            &self.endpoints.mylist_work_update,
            &[("type", "add"), ("mylist_id", list_id), ("workno", item.as_str())],
        )?;
        Ok(())
    }

    pub fn remove_item(&self, list: &Mylist, item: &ItemId) -> Result<(), ManagerError> {
        let index = list
            .item_ids
            .iter()
            .position(|existing| existing == item.as_str())
            .ok_or_else(|| ManagerError::ItemNotInList {
                item: item.to_string(),
                list: list.name.clone(),
            })?;
        let index = index.to_string();
        self.post(
            &self.endpoints.mylist_work_update,
            &[("type", "delete"), ("mylist_id", &list.id), ("mylist_work_id", &index)],
        )?;
        Ok(())
    }

    /// Returns `false` when the order was already as requested.
    pub fn reorder(&self, list: &Mylist, new_order: &[String]) -> Result<bool, ManagerError> {
        let Some(indices) = reorder_indices(&list.item_ids, new_order)? else {
            return Ok(false);
        };
        let order = indices
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.post(
            &self.endpoints.mylist_work_update,
            &[("type", "order"), ("mylist_id", &list.id), ("new_order", &order)],
        )?;
        Ok(true)
    }

    fn post(&self, url: &str, form: &[(&str, &str)]) -> Result<Value, ManagerError> {
        debug!(url, ?form, "mylist update");
        let response = self
            .session
            .client()
            .post(url)
            .form(form)
            .send()
            .map_err(|err| ManagerError::Http(err.to_string()))?;
        let body: Value = handle_status(response)?
            .json()
            .map_err(|err| ManagerError::Mylist(err.to_string()))?;
        if body.get("result").and_then(Value::as_bool) != Some(true) {
            return Err(ManagerError::Mylist(format!("request rejected: {body}")));
        }
        Ok(body)
    }
}
