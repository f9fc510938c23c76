// src/analysis/dot.rs

//! DOT rendering of an analysis graph.
//!
//! The data model in [`super`] is the contract; this module is one adapter
//! over it. Nodes are colored by state, static bind edges are dashed, and
//! nodes with a job id become clickable when `url_of_job` yields a link.

use crate::analysis::{Analysis, NodeKind, NodeState, RunResult};
use crate::input::JobId;
use crate::output::ActiveReason;

impl Analysis {
    /// Render the graph in DOT syntax.
    ///
    /// `url_of_job` maps a node's job id to a hyperlink target (e.g. the
    /// job's log page); returning `None` leaves the node unlinked.
    pub fn pp_dot(&self, url_of_job: &dyn Fn(&JobId) -> Option<String>) -> String {
        let mut out = String::new();
        out.push_str("digraph pipeline {\n");
        out.push_str("  node [shape=box,style=filled,fontname=\"sans-serif\"];\n");
        out.push_str("  rankdir=LR;\n");

        for (ix, node) in self.nodes() {
            let (color, fontcolor) = node_colors(node.state);
            let shape = node_shape(node.kind);
            let mut attrs = format!(
                "label=\"{}\",fillcolor=\"{}\",fontcolor=\"{}\",shape={}",
                escape(&node.label),
                color,
                fontcolor,
                shape
            );
            if let Some(job) = &node.job_id {
                if let Some(url) = url_of_job(job) {
                    attrs.push_str(&format!(",URL=\"{}\"", escape(&url)));
                }
                attrs.push_str(&format!(",tooltip=\"{}\"", escape(&job.0)));
            }
            out.push_str(&format!("  n{} [{}];\n", ix.index(), attrs));
        }

        for (from, to, static_dep) in self.edges() {
            let style = if static_dep { " [style=dashed]" } else { "" };
            out.push_str(&format!(
                "  n{} -> n{}{};\n",
                from.index(),
                to.index(),
                style
            ));
        }

        out.push_str("}\n");
        out
    }
}

fn node_colors(state: NodeState) -> (&'static str, &'static str) {
    match state {
        NodeState::Ready(RunResult::Ok) => ("#90ee90", "#000000"),
        NodeState::Ready(RunResult::Err) => ("#ff4040", "#ffffff"),
        NodeState::Active(ActiveReason::Running) => ("#ffa500", "#000000"),
        NodeState::Active(ActiveReason::ReadyToRerun) => ("#ffff00", "#000000"),
        NodeState::Blocked => ("#d3d3d3", "#606060"),
    }
}

fn node_shape(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Primitive => "oval",
        NodeKind::Bind => "note",
        NodeKind::Gate => "diamond",
        NodeKind::Failed => "octagon",
        _ => "box",
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Output;
    use crate::term::Term;

    #[test]
    fn renders_constant_node() {
        let term = Term::pure(42u32);
        let evaluated = crate::term::eval::evaluate(&term);
        let dot = evaluated.analysis.pp_dot(&|_| None);
        assert!(dot.starts_with("digraph pipeline {"));
        assert!(dot.contains("label=\"42\""));
        assert!(dot.contains("#90ee90"));
    }

    #[test]
    fn escapes_quotes_in_labels() {
        let term = Term::pure_labelled("say \"hi\"", ());
        let evaluated = crate::term::eval::evaluate(&term);
        let dot = evaluated.analysis.pp_dot(&|_| None);
        assert!(dot.contains("say \\\"hi\\\""));
    }

    #[test]
    fn links_jobs_through_url_of_job() {
        let input = crate::input::Input::new("builder", Output::Ok(1u8));
        input.set_with_job(Output::Ok(1u8), Some(JobId("job-build-7".into())));
        let term = Term::primitive("builder", &input);
        let evaluated = crate::term::eval::evaluate(&term);
        let dot = evaluated
            .analysis
            .pp_dot(&|job| Some(format!("/jobs/{job}")));
        assert!(dot.contains("URL=\"/jobs/job-build-7\""));
    }
}
