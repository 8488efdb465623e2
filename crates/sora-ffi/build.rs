fn main() {
    uniffi::generate_scaffolding("src/sora.udl").unwrap();
}
