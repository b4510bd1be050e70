//! `tomei env` - emit shell exports for the managed environment.

use anyhow::Result;

use tomei::state::StateStore;
use tomei::Paths;

pub(crate) fn run() -> Result<()> {
    let paths = Paths::user();
    let state = StateStore::user(&paths).load_read_only()?;

    println!("export PATH=\"{}:$PATH\"", paths.bin_dir().display());
    for (name, runtime) in &state.runtimes {
        for (key, value) in &runtime.env {
            println!("export {key}=\"{value}\" # runtime {name}");
        }
        if let Some(tool_bin) = &runtime.tool_bin_path {
            println!("export PATH=\"{}:$PATH\" # runtime {name}", tool_bin.display());
        }
    }
    Ok(())
}
