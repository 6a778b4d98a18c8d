fn main() {
    hearthguard_lib::run()
}
