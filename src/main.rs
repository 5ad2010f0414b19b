fn main() {
    joule::main();
}
