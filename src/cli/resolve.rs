use crate::store::PathResolver;

/// Prints where each raw upload path would land, one per line.
pub fn run_resolve(paths: &[String], normalize_static_release: bool) -> anyhow::Result<()> {
    let resolver = PathResolver::new(normalize_static_release);
    let mut failures = 0;

    for raw in paths {
        match resolver.resolve(raw) {
            Ok(canonical) => println!("{canonical}"),
            Err(e) => {
                eprintln!("{raw}: {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} path(s) could not be resolved");
    }
    Ok(())
}
