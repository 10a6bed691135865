//! Structural and syntactic hashes over a pipeline graph.
//!
//! The structural hash covers topology and types only; it is the
//! compatibility key checked when resuming a suspended execution. The
//! syntactic hash additionally covers names and versions, so renames that
//! leave the shape alone still change it.

use super::DagSpec;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn write_structure(dag: &DagSpec, canonical: &mut String, with_names: bool) {
    // BTreeMap/BTreeSet iteration is sorted, so the rendering is canonical.
    for (id, node) in &dag.data {
        let _ = write!(canonical, "data;{id};{};", node.ctype);
        if with_names {
            let _ = write!(canonical, "{};", node.name);
            for (module, nick) in &node.nicknames {
                let _ = write!(canonical, "nick:{module}={nick};");
            }
        }
        match &node.transform {
            Some(transform) => {
                let _ = write!(canonical, "transform:{};", transform.transform_type());
            }
            None => canonical.push_str("transform:-;"),
        }
        for (param, input) in &node.transform_inputs {
            let _ = write!(canonical, "tin:{param}={input};");
        }
        canonical.push('\n');
    }

    for (id, spec) in &dag.modules {
        let _ = write!(canonical, "module;{id};");
        if with_names {
            let _ = write!(
                canonical,
                "{};v{}.{};",
                spec.metadata.name, spec.metadata.major_version, spec.metadata.minor_version
            );
        }
        for (param, ty) in &spec.consumes {
            let _ = write!(canonical, "in:{param}:{ty};");
        }
        for (param, ty) in &spec.produces {
            let _ = write!(canonical, "out:{param}:{ty};");
        }
        canonical.push('\n');
    }

    for (data, module) in &dag.in_edges {
        let _ = writeln!(canonical, "inEdge;{data};{module}");
    }
    for (module, data) in &dag.out_edges {
        let _ = writeln!(canonical, "outEdge;{module};{data}");
    }
    for name in &dag.declared_outputs {
        let binding = dag
            .output_bindings
            .get(name)
            .map(ToString::to_string)
            .unwrap_or_default();
        let _ = writeln!(canonical, "output;{name};{binding}");
    }
}

/// Hash of the graph's shape: topology and types
pub fn structural_hash(dag: &DagSpec) -> String {
    let mut canonical = String::new();
    write_structure(dag, &mut canonical, false);
    hex(&Sha256::digest(canonical.as_bytes()))
}

/// Hash of the graph's shape plus names, nicknames, and versions
pub fn syntactic_hash(dag: &DagSpec) -> String {
    let mut canonical = String::new();
    let _ = writeln!(canonical, "dag;{};{}", dag.metadata.name, dag.metadata.description);
    write_structure(dag, &mut canonical, true);
    hex(&Sha256::digest(canonical.as_bytes()))
}
