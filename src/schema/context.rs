//! Shared state for one query compile.
//!
//! The context owns the table-alias stack paths render against, the registry
//! of `$$links` joins discovered while rendering filters, and the list of
//! hoisted constraints lifted out of join conditions when links nest.
//! It lives for exactly one compile; link aliases are path-dependent and must
//! never be reused across compiles.

use crate::schema::options::LinkQueryOptions;
use crate::schema::select_map::SelectMap;

/// One registered `$$links` traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredLink {
    pub verb: String,
    /// Alias of the `links2` edge join, `links@/<stack>`.
    pub links_alias: String,
    /// Alias of the joined contracts table, `join@/<stack>`.
    pub join_alias: String,
    /// Filter applied at the join site. `true` when the real filter was
    /// hoisted because this link nests further links.
    pub filter_sql: String,
    /// Links registered while compiling this link's subschema.
    pub nested: LinkRegistry,
    /// Projection for the linked contracts.
    pub select: SelectMap,
    pub options: LinkQueryOptions,
    /// Set for links compiled under `anyOf`: the payload merge must gate on
    /// edge participation instead of assuming every edge matched.
    pub filtered: bool,
    /// Ordinal of this link across the whole registry tree; edges carry it
    /// so the outer SELECT can tell which traversal produced them.
    pub edge_index: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinkRegistry {
    pub entries: Vec<RegisteredLink>,
}

impl LinkRegistry {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of links in this registry and all nested ones.
    pub fn total(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| 1 + entry.nested.total())
            .sum()
    }
}

/// Escape a verb for use inside a `links@/…` alias: backslashes and the
/// path separator itself.
fn escape_alias_segment(verb: &str) -> String {
    verb.replace('\\', "\\\\").replace('/', "\\/")
}

#[derive(Debug)]
pub struct BuilderContext {
    root_table: String,
    table_stack: Vec<String>,
    registry: LinkRegistry,
    /// Index path to the link currently being compiled.
    cursor: Vec<usize>,
    /// Verb path to the link currently being compiled.
    link_path: Vec<String>,
    links_seen: usize,
    hoisted: Vec<String>,
    element_counter: usize,
    edge_counter: usize,
}

impl BuilderContext {
    pub fn new(root_table: &str) -> Self {
        Self {
            root_table: root_table.to_string(),
            table_stack: Vec::new(),
            registry: LinkRegistry::default(),
            cursor: Vec::new(),
            link_path: Vec::new(),
            links_seen: 0,
            hoisted: Vec::new(),
            element_counter: 0,
            edge_counter: 0,
        }
    }

    pub fn root_table(&self) -> &str {
        &self.root_table
    }

    /// Alias paths currently render against.
    pub fn current_alias(&self) -> &str {
        self.table_stack
            .last()
            .map(String::as_str)
            .unwrap_or(&self.root_table)
    }

    /// Push an alias for a correlated scope (array element subqueries).
    pub fn push_alias(&mut self, alias: &str) {
        self.table_stack.push(alias.to_string());
    }

    pub fn pop_alias(&mut self) {
        self.table_stack.pop();
    }

    /// Fresh alias for an unnested array element.
    pub fn next_element_alias(&mut self) -> String {
        let alias = format!("elem@{}", self.element_counter);
        self.element_counter += 1;
        alias
    }

    /// Number of links registered so far in this compile.
    pub fn links_seen(&self) -> usize {
        self.links_seen
    }

    fn registry_at(&mut self, cursor: &[usize]) -> &mut LinkRegistry {
        let mut registry = &mut self.registry;
        for &index in cursor {
            registry = &mut registry.entries[index].nested;
        }
        registry
    }

    /// Compute the alias pair a link at the current stack would get.
    pub fn link_aliases(&self, verb: &str) -> (String, String) {
        let mut segments: Vec<String> = self
            .link_path
            .iter()
            .map(|segment| escape_alias_segment(segment))
            .collect();
        segments.push(escape_alias_segment(verb));
        let stack = segments.join("/");
        (format!("links@/{}", stack), format!("join@/{}", stack))
    }

    /// Open a link scope: register the entry (filter filled on close), make
    /// its join alias the current table, and descend the cursor into it.
    pub fn begin_link(
        &mut self,
        verb: &str,
        select: SelectMap,
        options: LinkQueryOptions,
        filtered: bool,
    ) {
        let (links_alias, join_alias) = self.link_aliases(verb);
        let entry = RegisteredLink {
            verb: verb.to_string(),
            links_alias,
            join_alias: join_alias.clone(),
            filter_sql: "true".to_string(),
            nested: LinkRegistry::default(),
            select,
            options,
            filtered,
            edge_index: self.edge_counter,
        };
        self.edge_counter += 1;
        self.links_seen += 1;

        let cursor = self.cursor.clone();
        let registry = self.registry_at(&cursor);
        registry.entries.push(entry);
        let index = registry.entries.len() - 1;

        self.cursor.push(index);
        self.link_path.push(verb.to_string());
        self.table_stack.push(join_alias);
    }

    /// Close a link scope. When the inner compile registered further links,
    /// its filter cannot live in the join condition (the join aliases it
    /// references are joined after it); it is hoisted into the root WHERE
    /// and the join keeps `true`.
    pub fn end_link(&mut self, filter_sql: String, nested_links: bool) {
        self.table_stack.pop();
        self.link_path.pop();
        let cursor = self.cursor.clone();
        self.cursor.pop();

        let mut registry = &mut self.registry;
        for &index in &cursor[..cursor.len() - 1] {
            registry = &mut registry.entries[index].nested;
        }
        let entry = &mut registry.entries[*cursor.last().expect("cursor cannot be empty")];

        if nested_links {
            self.hoisted.push(filter_sql);
        } else {
            entry.filter_sql = filter_sql;
        }
    }

    pub fn registry(&self) -> &LinkRegistry {
        &self.registry
    }

    pub fn hoisted(&self) -> &[String] {
        &self.hoisted
    }

    /// Tear the context apart for the link expansion engine.
    pub fn into_parts(self) -> (LinkRegistry, Vec<String>) {
        (self.registry, self.hoisted)
    }
}
