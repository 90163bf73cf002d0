use crate::error::Result;
use cvbias::backends::{AdapterRegistry, BackendKind};

pub fn run() -> Result<()> {
    let registry = AdapterRegistry::standard();
    for kind in BackendKind::ALL {
        let scoped = registry
            .get(kind)
            .is_some_and(|adapter| adapter.requires_scoped_session());
        if scoped {
            println!("{:<8} (scoped session)", kind);
        } else {
            println!("{}", kind);
        }
    }
    Ok(())
}
