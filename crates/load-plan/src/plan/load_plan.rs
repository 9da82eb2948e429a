use serde::Serialize;
use serde_json::{json, Value};

use super::nodes::{NodeId, NodeKind, PlanNode, PlanNodes};
use crate::error::LoadPlanResult;
use crate::navigable_path::NavigablePath;
use crate::sql_ast::{FromClause, TableGroupId, TableGroupKind};

/// What kind of load a plan performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Disposition {
    /// Loads one or more entities of a single root type
    EntityLoader,
    /// Initializes the elements of a collection
    CollectionInitializer,
    /// Returns entities next to scalar values
    Mixed,
}

/// A selected basic value next to the root return
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalarReturn {
    pub navigable_path: NavigablePath,
    pub type_name: String,
    pub alias: Option<String>,
}

/// Top-level query result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Return {
    Entity(NodeId),
    Collection(NodeId),
    Scalar(ScalarReturn),
}

impl Return {
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Entity(id) | Self::Collection(id) => Some(*id),
            Self::Scalar(_) => None,
        }
    }
}

/// Immutable result of a plan build
///
/// Holds the returns, the fetch tree below them and the from clause the
/// renderer reads.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    returns: Vec<Return>,
    nodes: PlanNodes,
    query_spaces: FromClause,
    disposition: Disposition,
    force_fetch_lazy_attributes: bool,
}

impl LoadPlan {
    pub(crate) fn new(
        returns: Vec<Return>,
        nodes: PlanNodes,
        query_spaces: FromClause,
        disposition: Disposition,
        force_fetch_lazy_attributes: bool,
    ) -> Self {
        Self {
            returns,
            nodes,
            query_spaces,
            disposition,
            force_fetch_lazy_attributes,
        }
    }

    pub fn returns(&self) -> &[Return] {
        &self.returns
    }

    pub fn nodes(&self) -> &PlanNodes {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes.get(id)
    }

    pub fn query_spaces(&self) -> &FromClause {
        &self.query_spaces
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    pub fn are_lazy_attributes_forced_to_be_fetched(&self) -> bool {
        self.force_fetch_lazy_attributes
    }

    /// Node of the first entity or collection return
    pub fn root_node(&self) -> Option<&PlanNode> {
        self.returns
            .iter()
            .find_map(Return::node)
            .and_then(|id| self.nodes.get(id))
    }

    /// Fetches directly owned by `id`
    pub fn fetches(&self, id: NodeId) -> impl Iterator<Item = &PlanNode> {
        self.nodes.fetches(id)
    }

    /// Fetch loaded for `navigable_path`
    pub fn find_fetch(&self, navigable_path: &NavigablePath) -> Option<&PlanNode> {
        self.nodes
            .iter()
            .find(|node| node.kind.is_fetch() && &node.navigable_path == navigable_path)
    }

    /// Every fetch joined into the main result set
    pub fn join_fetches(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes
            .iter()
            .filter(|node| node.kind.is_fetch() && node.is_join_fetched())
    }

    /// Whether joined collections may duplicate root rows
    pub fn has_collection_join_fetches(&self) -> bool {
        self.join_fetches()
            .any(|node| node.kind == NodeKind::CollectionFetch)
    }

    /// Diagnostic rendering of returns, fetch tree and table groups
    pub fn to_json(&self) -> Value {
        let returns: Vec<Value> = self
            .returns
            .iter()
            .map(|r| match r {
                Return::Entity(id) | Return::Collection(id) => self.node_json(*id),
                Return::Scalar(scalar) => json!({
                    "type": "ScalarReturn",
                    "path": scalar.navigable_path.full_path(),
                    "typeName": scalar.type_name,
                    "alias": scalar.alias,
                }),
            })
            .collect();
        let table_groups: Vec<Value> = self
            .query_spaces
            .roots()
            .iter()
            .map(|root| self.table_group_json(*root))
            .collect();

        json!({
            "disposition": self.disposition,
            "forceFetchLazyAttributes": self.force_fetch_lazy_attributes,
            "returns": returns,
            "tableGroups": table_groups,
        })
    }

    pub fn to_json_string_pretty(&self) -> LoadPlanResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_json())?)
    }

    fn node_json(&self, id: NodeId) -> Value {
        let Some(node) = self.nodes.get(id) else {
            return Value::Null;
        };
        let mut value = json!({
            "type": node.kind.label(),
            "path": node.navigable_path.full_path(),
        });
        if let Value::Object(map) = &mut value {
            if let Some(entity) = &node.entity_name {
                map.insert("entity".into(), json!(entity));
            }
            if let Some(role) = &node.collection_role {
                map.insert("role".into(), json!(role));
            }
            if let Some(strategy) = node.fetch_strategy {
                map.insert("strategy".into(), json!(strategy.to_string()));
            }
            if let Some(space) = node.query_space {
                map.insert("tableGroup".into(), json!(space.to_string()));
            }
            if let NodeKind::BidirectionalEntityFetch { target } = node.kind {
                map.insert("target".into(), json!(target.to_string()));
            }
            for (key, part) in [
                ("identifier", node.identifier),
                ("index", node.index_graph),
                ("element", node.element_graph),
            ] {
                if let Some(part) = part {
                    map.insert(key.into(), self.node_json(part));
                }
            }
            if !node.fetches.is_empty() {
                let fetches: Vec<Value> = node.fetches.iter().map(|f| self.node_json(*f)).collect();
                map.insert("fetches".into(), Value::Array(fetches));
            }
        }
        value
    }

    fn table_group_json(&self, id: TableGroupId) -> Value {
        let Some(group) = self.query_spaces.table_group(id) else {
            return Value::Null;
        };
        let kind = match group.kind() {
            TableGroupKind::Standard(_) => "standard",
            TableGroupKind::Lazy(lazy) if lazy.is_initialized() => "lazy (initialized)",
            TableGroupKind::Lazy(_) => "lazy",
            TableGroupKind::Virtual(_) => "virtual",
            TableGroupKind::Correlated(_) => "correlated",
        };
        let tables: Vec<Value> = self
            .query_spaces
            .primary_table_reference(id)
            .into_iter()
            .chain(
                self.query_spaces
                    .table_reference_joins(id)
                    .iter()
                    .map(|j| j.table_reference.clone()),
            )
            .map(|r| json!(format!("{} {}", r.effective_table_expression(), r.identification_variable())))
            .collect();
        let joins: Vec<Value> = group
            .all_joins()
            .map(|join| {
                json!({
                    "joinType": join.join_type().to_string(),
                    "group": self.table_group_json(join.joined_group()),
                })
            })
            .collect();

        json!({
            "id": id.to_string(),
            "path": group.navigable_path().full_path(),
            "kind": kind,
            "tables": tables,
            "joins": joins,
        })
    }
}
