//! Build script for the sensor node firmware.

fn main() {
    // Exposes the ESP-IDF environment to esp-idf-svc.
    embuild::espidf::sysenv::output();
}
