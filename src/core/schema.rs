//! Purpose: Column resolution seam between a cursor and the schema that defines its columns.
//! Exports: `SchemaResolver`, `ColumnDecl`, `ColumnBuilder`, `MapSchema`.
//! Role: Turns a `ColumnSpec` into a declaration, then into a root production in the graph.
//! Invariants: A declaration's `cid` names the root production its builder registers.

use crate::core::error::{Error, ErrorKind};
use crate::core::physical::PhysicalColumn;
use crate::core::production::{ProdId, ProdMeta, ProductionGraph};
use crate::core::types::{ColumnSpec, CtxId, TypeDesc, Typedecl};
use std::fmt;
use std::sync::Arc;

/// Resolved column declaration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnDecl {
    pub name: String,
    pub cid: CtxId,
    pub typedecl: Typedecl,
    pub desc: TypeDesc,
}

impl ColumnDecl {
    pub fn new(name: impl Into<String>, cid: CtxId, typedecl: Typedecl, desc: TypeDesc) -> Self {
        Self {
            name: name.into(),
            cid,
            typedecl,
            desc,
        }
    }

    pub fn meta(&self) -> ProdMeta {
        ProdMeta::new(self.name.clone(), self.desc, self.cid)
    }
}

pub trait SchemaResolver: Send + Sync {
    /// `NotFound` for an unknown name; `TypeMismatch` when the name exists but not the cast type.
    fn find_column(&self, spec: &ColumnSpec) -> Result<ColumnDecl, Error>;

    /// Context ids of every declaration sharing `name`.
    fn overloads(&self, _name: &str) -> Vec<CtxId> {
        Vec::new()
    }

    fn resolve_production(
        &self,
        decl: &ColumnDecl,
        graph: &mut ProductionGraph,
    ) -> Result<ProdId, Error>;

    /// Declaration and root production in one step; used by builders that read other columns.
    fn resolve(
        &self,
        spec: &ColumnSpec,
        graph: &mut ProductionGraph,
    ) -> Result<(ColumnDecl, ProdId), Error> {
        let decl = self.find_column(spec)?;
        let root = self.resolve_production(&decl, graph)?;
        Ok((decl, root))
    }
}

pub type ColumnBuilder = Arc<
    dyn Fn(&mut ProductionGraph, &ColumnDecl, &dyn SchemaResolver) -> Result<ProdId, Error>
        + Send
        + Sync,
>;

/// In-memory schema: declarations paired with closures that build their productions.
#[derive(Default)]
pub struct MapSchema {
    columns: Vec<(ColumnDecl, ColumnBuilder)>,
}

impl fmt::Debug for MapSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.columns.iter().map(|(decl, _)| decl))
            .finish()
    }
}

impl MapSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(
        mut self,
        decl: ColumnDecl,
        builder: impl Fn(&mut ProductionGraph, &ColumnDecl, &dyn SchemaResolver) -> Result<ProdId, Error>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.columns.push((decl, Arc::new(builder)));
        self
    }

    /// Column served straight from `storage`.
    pub fn with_physical(self, decl: ColumnDecl, storage: Arc<dyn PhysicalColumn>) -> Self {
        self.with_column(decl, move |graph, decl, _| {
            Ok(graph.add_physical(decl.meta(), Arc::clone(&storage)))
        })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl SchemaResolver for MapSchema {
    fn find_column(&self, spec: &ColumnSpec) -> Result<ColumnDecl, Error> {
        let name = spec.column_name();
        let mut named = self.columns.iter().map(|(decl, _)| decl).filter(|decl| decl.name == name);
        let found = match spec.typedecl() {
            None => named.next(),
            Some(typedecl) => {
                let mut any = false;
                let hit = named.find(|decl| {
                    any = true;
                    &decl.typedecl == typedecl
                });
                if hit.is_none() && any {
                    return Err(Error::new(ErrorKind::TypeMismatch)
                        .with_message(format!("column has no `{typedecl}` form"))
                        .with_column(name));
                }
                hit
            }
        };
        found.cloned().ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("unknown column")
                .with_column(name)
        })
    }

    fn overloads(&self, name: &str) -> Vec<CtxId> {
        self.columns
            .iter()
            .filter(|(decl, _)| decl.name == name)
            .map(|(decl, _)| decl.cid)
            .collect()
    }

    fn resolve_production(
        &self,
        decl: &ColumnDecl,
        graph: &mut ProductionGraph,
    ) -> Result<ProdId, Error> {
        if let Some(existing) = graph.find(decl.cid) {
            return Ok(existing);
        }
        let (_, builder) = self
            .columns
            .iter()
            .find(|(known, _)| known.cid == decl.cid)
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound)
                    .with_message("no production for column")
                    .with_column(decl.name.as_str())
            })?;
        builder(graph, decl, self)
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnDecl, MapSchema, SchemaResolver};
    use crate::core::error::ErrorKind;
    use crate::core::physical::MemoryColumn;
    use crate::core::production::ProductionGraph;
    use crate::core::types::{ColumnSpec, CtxId, TypeDesc, Typedecl};
    use std::sync::Arc;

    fn schema() -> MapSchema {
        let storage = Arc::new(MemoryColumn::from_u32s(1, &[1, 2], 2).expect("storage"));
        MapSchema::new()
            .with_physical(
                ColumnDecl::new("LEN", CtxId::new(0, 1), Typedecl::new("U32", 1), TypeDesc::u32()),
                storage.clone(),
            )
            .with_physical(
                ColumnDecl::new("LEN", CtxId::new(0, 2), Typedecl::new("U8", 4), TypeDesc::u8()),
                storage,
            )
    }

    #[test]
    fn name_picks_first_overload_and_cast_picks_exact_type() {
        let schema = schema();
        let plain = schema.find_column(&ColumnSpec::name("LEN")).expect("plain");
        assert_eq!(plain.cid, CtxId::new(0, 1));
        let cast = schema
            .find_column(&ColumnSpec::cast(Typedecl::new("U8", 4), "LEN"))
            .expect("cast");
        assert_eq!(cast.cid, CtxId::new(0, 2));
        assert_eq!(schema.overloads("LEN").len(), 2);
    }

    #[test]
    fn unknown_names_and_types_are_distinguished() {
        let schema = schema();
        let missing = schema.find_column(&ColumnSpec::name("QUAL")).expect_err("missing");
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        let wrong = schema
            .find_column(&ColumnSpec::cast(Typedecl::new("F32", 1), "LEN"))
            .expect_err("wrong type");
        assert_eq!(wrong.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn resolved_productions_are_shared() {
        let schema = schema();
        let mut graph = ProductionGraph::default();
        let (_, first) = schema.resolve(&ColumnSpec::name("LEN"), &mut graph).expect("first");
        let (_, again) = schema.resolve(&ColumnSpec::name("LEN"), &mut graph).expect("again");
        assert_eq!(first, again);
        assert_eq!(graph.len(), 1);
    }
}
