fn main() {
    // ESP-IDF link arguments and sysenv are only needed for the device build.
    // Host builds (tests, fuzzing) skip embuild entirely.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
