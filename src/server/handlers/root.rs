pub async fn home() -> &'static str {
    "Podio Relay"
}
