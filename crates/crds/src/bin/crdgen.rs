//! Prints the KubeBMC CustomResourceDefinition as YAML.
//!
//! ```sh
//! cargo run -p crds --bin crdgen > config/crd/kubebmcs.yaml
//! ```

use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = crds::KubeBMC::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
