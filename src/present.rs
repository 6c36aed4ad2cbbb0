//! Human and machine renderings of a classified graph

use crate::{
    api::Package,
    errors::GraphError,
    graph::{DeletionPlan, DeletionReport, Graph, Node, StepOutcome},
};
use chrono::{DateTime, SecondsFormat, Utc};
use comfy_table::{
    presets::{NOTHING, UTF8_BORDERS_ONLY},
    Attribute, Cell, Color, ContentArrangement, Table,
};
use serde::Serialize;
use std::{collections::BTreeSet, io::Write};

/// Something that can draw one image, or the whole graph
pub trait Presenter {
    /// Render the image rooted at `root`, or every image when `root` is `None`
    fn render(&self, graph: &Graph, root: Option<&str>, out: &mut dyn Write)
        -> Result<(), GraphError>;
}

/// Nodes to show, in digest order
fn selected<'a>(graph: &'a Graph, root: Option<&str>) -> Vec<&'a Node> {
    match root {
        None => graph.nodes().collect(),
        Some(root) => graph
            .closure(root)
            .iter()
            .filter_map(|digest| graph.get(digest))
            .collect(),
    }
}

fn short_digest(digest: &str) -> &str {
    let end = "sha256:".len() + 12;
    digest.get(..end).unwrap_or(digest)
}

fn tags_str(node: &Node) -> String {
    if node.tags().is_empty() {
        "untagged".to_owned()
    } else {
        node.tags().join(", ")
    }
}

fn format_time(time: &Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Box-drawing tree, index on top with platforms and referrers below
pub struct TreePresenter;

impl TreePresenter {
    /// Children shown under a node
    ///
    /// Manifests it lists come first, then referrers describing it. An
    /// attestation listed by an index is drawn under its subject instead.
    fn children<'a>(graph: &'a Graph, node: &Node) -> Vec<&'a Node> {
        // a referrer's outgoing edge is its subject, drawn above it
        let mut listed: Vec<&Node> = if node.is_referrer() {
            Vec::new()
        } else {
            graph
                .outgoing_in_graph(node.digest())
                .filter(|child| {
                    !child.is_referrer()
                        || graph
                            .outgoing_in_graph(child.digest())
                            .all(|target| target.digest() == node.digest())
                })
                .collect()
        };
        let listed_digests: BTreeSet<&str> = listed.iter().map(|n| n.digest()).collect();
        let mut referrers: Vec<&Node> = graph
            .incoming_nodes(node.digest())
            .filter(|parent| parent.is_referrer() && !listed_digests.contains(parent.digest()))
            .collect();
        listed.sort_by_key(|n| (n.is_referrer(), n.id(), n.digest().to_owned()));
        referrers.sort_by_key(|n| (n.id(), n.digest().to_owned()));
        listed.extend(referrers);
        listed
    }

    fn line(graph: &Graph, node: &Node) -> String {
        let mut line = format!("{}  {}", short_digest(node.digest()), node.roles);
        if let Some(platform) = &node.platform {
            line.push_str(&format!(" {}", platform));
        }
        line.push_str(&format!("  [{}]", tags_str(node)));
        match node.id() {
            Some(id) => line.push_str(&format!("  id {}", id)),
            None => line.push_str("  (no version)"),
        }
        if graph.is_shared(node.digest()) {
            line.push_str("  (shared)");
        }
        line
    }

    fn draw(
        graph: &Graph,
        node: &Node,
        prefix: &str,
        path: &mut Vec<String>,
        out: &mut dyn Write,
    ) -> Result<(), GraphError> {
        path.push(node.digest().to_owned());
        let children: Vec<&Node> = Self::children(graph, node)
            .into_iter()
            .filter(|child| !path.iter().any(|d| d == child.digest()))
            .collect();
        let count = children.len();
        for (i, child) in children.into_iter().enumerate() {
            let last = i + 1 == count;
            writeln!(
                out,
                "{}{}{}",
                prefix,
                if last { "└── " } else { "├── " },
                Self::line(graph, child)
            )?;
            let deeper = format!("{}{}", prefix, if last { "    " } else { "│   " });
            Self::draw(graph, child, &deeper, path, out)?;
        }
        path.pop();
        Ok(())
    }
}

impl Presenter for TreePresenter {
    fn render(
        &self,
        graph: &Graph,
        root: Option<&str>,
        out: &mut dyn Write,
    ) -> Result<(), GraphError> {
        let roots: Vec<&str> = match root {
            Some(root) => vec![root],
            None => graph.roots().iter().map(String::as_str).collect(),
        };
        for (i, root) in roots.into_iter().enumerate() {
            let node = match graph.get(root) {
                Some(node) => node,
                None => return Err(GraphError::NotFound(root.to_owned())),
            };
            if i > 0 {
                writeln!(out)?;
            }
            writeln!(out, "{}", Self::line(graph, node))?;
            Self::draw(graph, node, "", &mut Vec::new(), out)?;
        }
        Ok(())
    }
}

/// One row per node
pub struct TablePresenter {
    /// Plain columns without borders
    pub raw: bool,
}

impl Presenter for TablePresenter {
    fn render(
        &self,
        graph: &Graph,
        root: Option<&str>,
        out: &mut dyn Write,
    ) -> Result<(), GraphError> {
        let mut table = Table::new();
        table
            .load_preset(if self.raw { NOTHING } else { UTF8_BORDERS_ONLY })
            .set_content_arrangement(ContentArrangement::Disabled)
            .set_header(vec!["ID", "Digest", "Types", "Tags", "Size", "Created", "Images"]);

        let mut nodes = selected(graph, root);
        nodes.sort_by_key(|n| (n.id().is_none(), n.id(), n.digest().to_owned()));
        for node in nodes {
            let images = graph.membership_count(node.digest());
            table.add_row(vec![
                Cell::new(node.id().map(|id| id.to_string()).unwrap_or_default())
                    .add_attribute(Attribute::Bold),
                Cell::new(short_digest(node.digest())),
                Cell::new(node.roles.to_string()),
                Cell::new(tags_str(node)),
                Cell::new(node.version.size),
                Cell::new(format_time(&node.version.created_at)),
                if images > 1 {
                    Cell::new(format!("{} (shared)", images)).fg(Color::Yellow)
                } else {
                    Cell::new(images)
                },
            ]);
        }
        writeln!(out, "{}", table)?;
        Ok(())
    }
}

/// JSON array of node records
pub struct JsonPresenter {
    pub pretty: bool,
}

#[derive(Serialize)]
struct NodeRecord<'a> {
    id: Option<i64>,
    digest: &'a str,
    tags: &'a [String],
    types: &'a crate::classify::RoleSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<String>,
    size: i64,
    outgoing_refs: &'a BTreeSet<String>,
    incoming_refs: &'a BTreeSet<String>,
    created_at: Option<DateTime<Utc>>,
}

impl Presenter for JsonPresenter {
    fn render(
        &self,
        graph: &Graph,
        root: Option<&str>,
        out: &mut dyn Write,
    ) -> Result<(), GraphError> {
        let records: Vec<NodeRecord> = selected(graph, root)
            .into_iter()
            .map(|node| NodeRecord {
                id: node.id(),
                digest: node.digest(),
                tags: node.tags(),
                types: &node.roles,
                platform: node.platform.as_ref().map(ToString::to_string),
                size: node.version.size,
                outgoing_refs: &node.outgoing,
                incoming_refs: &node.incoming,
                created_at: node.version.created_at,
            })
            .collect();
        if self.pretty {
            serde_json::to_writer_pretty(&mut *out, &records)?;
        } else {
            serde_json::to_writer(&mut *out, &records)?;
        }
        writeln!(out)?;
        Ok(())
    }
}

/// One row per image
pub fn images_table(graph: &Graph, raw: bool) -> String {
    let mut table = Table::new();
    table
        .load_preset(if raw { NOTHING } else { UTF8_BORDERS_ONLY })
        .set_content_arrangement(ContentArrangement::Disabled)
        .set_header(vec!["Root", "Types", "Tags", "Nodes", "Shared", "Created"]);

    for root in graph.roots() {
        let node = match graph.get(root) {
            Some(node) => node,
            None => continue,
        };
        let partition = graph.partition(root);
        table.add_row(vec![
            Cell::new(short_digest(root)).add_attribute(Attribute::Bold),
            Cell::new(node.roles.to_string()),
            Cell::new(tags_str(node)),
            Cell::new(partition.exclusive.len() + partition.shared.len()),
            Cell::new(partition.shared.len()),
            Cell::new(format_time(&node.version.created_at)),
        ]);
    }
    table.to_string()
}

pub fn packages_table(packages: &[Package], raw: bool) -> String {
    let mut table = Table::new();
    table
        .load_preset(if raw { NOTHING } else { UTF8_BORDERS_ONLY })
        .set_content_arrangement(ContentArrangement::Disabled)
        .set_header(vec!["Package", "Visibility", "Versions", "Updated"]);

    for package in packages {
        table.add_row(vec![
            Cell::new(&package.name).add_attribute(Attribute::Bold),
            Cell::new(package.visibility.as_deref().unwrap_or("")),
            Cell::new(
                package
                    .version_count
                    .map(|n| n.to_string())
                    .unwrap_or_default(),
            ),
            Cell::new(format_time(&package.updated_at)),
        ]);
    }
    table.to_string()
}

/// What a deletion would do, for dry runs and confirmation
pub fn plan_table(plan: &DeletionPlan, raw: bool) -> String {
    let mut table = Table::new();
    table
        .load_preset(if raw { NOTHING } else { UTF8_BORDERS_ONLY })
        .set_content_arrangement(ContentArrangement::Disabled)
        .set_header(vec!["Step", "ID", "Digest", "Types", "Tags", "Action"]);

    for (i, step) in plan.steps.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(step.id).add_attribute(Attribute::Bold),
            Cell::new(short_digest(&step.digest)),
            Cell::new(step.roles.to_string()),
            Cell::new(step.tags.join(", ")),
            Cell::new("delete").fg(Color::Red),
        ]);
    }
    for shared in &plan.shared {
        table.add_row(vec![
            Cell::new(""),
            Cell::new(shared.id.map(|id| id.to_string()).unwrap_or_default()),
            Cell::new(short_digest(&shared.digest)),
            Cell::new(shared.roles.to_string()),
            Cell::new(""),
            Cell::new(format!("keep, shared by {} images", shared.images.len()))
                .fg(Color::Yellow),
        ]);
    }
    for digest in &plan.skipped {
        table.add_row(vec![
            Cell::new(""),
            Cell::new(""),
            Cell::new(short_digest(digest)),
            Cell::new(""),
            Cell::new(""),
            Cell::new("skip, no package version"),
        ]);
    }
    table.to_string()
}

pub fn report_table(report: &DeletionReport, raw: bool) -> String {
    let mut table = Table::new();
    table
        .load_preset(if raw { NOTHING } else { UTF8_BORDERS_ONLY })
        .set_content_arrangement(ContentArrangement::Disabled)
        .set_header(vec!["ID", "Digest", "Outcome"]);

    for step in &report.steps {
        let outcome = match &step.outcome {
            StepOutcome::Deleted => Cell::new("deleted").fg(Color::Green),
            StepOutcome::Failed(message) => Cell::new(format!("failed: {}", message)).fg(Color::Red),
            StepOutcome::NotAttempted => Cell::new("not attempted").fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(step.step.id),
            Cell::new(short_digest(&step.step.digest)),
            outcome,
        ]);
    }
    table.to_string()
}
