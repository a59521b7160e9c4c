use std::path::Path;

use serde::Serialize;

use crate::store::BuildIndex;
use crate::types::BuildRecord;

#[derive(Serialize)]
struct BuildOutput {
    #[serde(flatten)]
    record: BuildRecord,
    failed: bool,
    arches: Vec<String>,
    tags: Vec<String>,
}

pub fn run_builds(repo_root: &Path, json: bool) -> anyhow::Result<()> {
    if !repo_root.is_dir() {
        anyhow::bail!("Repository root {} is not a directory", repo_root.display());
    }

    let index = BuildIndex::scan(repo_root);

    let builds: Vec<BuildOutput> = index
        .builds()
        .iter()
        .map(|build| BuildOutput {
            record: build.record(),
            failed: build.is_failed(),
            arches: build.arches().unwrap_or_default(),
            tags: index.tags_for(build),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&builds)?);
        return Ok(());
    }

    if builds.is_empty() {
        println!("No builds under {}", repo_root.display());
        return Ok(());
    }

    for build in &builds {
        let state = if build.failed { "FAILED" } else { "COMPLETE" };
        println!(
            "{:<11} {:<9} {} [{}]",
            build.record.build_id,
            state,
            build.record.nvr,
            build.arches.join(", ")
        );
    }
    println!();
    println!(
        "{} build(s) of {} package(s)",
        builds.len(),
        index.products().len()
    );

    Ok(())
}
