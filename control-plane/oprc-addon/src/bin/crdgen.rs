use kube::core::CustomResourceExt;
use oprc_addon::crd::AddonConfig;

fn main() -> anyhow::Result<()> {
    let crd = AddonConfig::crd();
    println!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
