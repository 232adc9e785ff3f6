use girder_types::*;
use kube::CustomResourceExt;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/operator.girder.io_staticpodoperator_crd.yaml",
        serde_yaml::to_string(&StaticPodOperator::crd()).unwrap(),
    )
    .unwrap();
}
