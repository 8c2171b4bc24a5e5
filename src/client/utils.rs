use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use crate::client::config::Config;
use crate::client::consts::AUTHORIZATION_HEADER;

pub fn build_request(config: &Config, access_token: &SecretString) -> tokio_tungstenite::tungstenite::Result<Request> {
    let mut request = config.endpoint().into_client_request()?;
    request.headers_mut()
        .insert(
            AUTHORIZATION_HEADER,
            format!("Bearer {}", access_token.expose_secret()).as_str().parse()?
        );
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_bearer_token() {
        let config = Config::builder().with_endpoint("ws://localhost:8080/converse").build();
        let token = SecretString::from("secret".to_string());
        let request = build_request(&config, &token).unwrap();
        assert_eq!(request.uri().path(), "/converse");
        assert_eq!(request.headers()[AUTHORIZATION_HEADER], "Bearer secret");
    }
}
