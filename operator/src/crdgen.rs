use kube::CustomResourceExt;

fn main() {
    print!("{}", serde_yaml::to_string(&controller::SampleConfig::crd()).unwrap());
}
