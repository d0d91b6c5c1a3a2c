fn main() {
    println!("cargo:rerun-if-env-changed=STRIKEGUARD_CONFIG");

    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
