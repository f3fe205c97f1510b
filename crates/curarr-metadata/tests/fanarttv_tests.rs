use curarr_metadata::{FanartTvClient, ProviderCallError};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn fetch_movie_artwork_parses_all_kinds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/movies/27205"))
        .and(header("api-key", "fanart-api-key"))
        .and(header("client-key", "fanart-client-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Inception",
            "tmdb_id": "27205",
            "movieposter": [{ "url": "https://img/p1.jpg", "likes": "12", "lang": "en" }],
            "moviebackground": [{ "url": "https://img/bg1.jpg", "likes": "4", "lang": "00" }],
            "hdmovielogo": [{ "url": "https://img/logo1.png", "likes": "7", "lang": "en" }],
            "moviebanner": [{ "url": "https://img/banner1.jpg" }],
            "moviethumb": [{ "url": "https://img/thumb1.jpg", "lang": "en" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = FanartTvClient::new(
        "fanart-api-key".to_string(),
        Some("fanart-client-key".to_string()),
        Some(server.uri()),
    );

    let artwork = client.fetch_movie_artwork(27205).await.unwrap();
    assert_eq!(artwork.posters.len(), 1);
    assert_eq!(artwork.posters[0].likes, Some(12));
    assert_eq!(artwork.backgrounds[0].language, None);
    assert_eq!(artwork.hd_logos[0].url, "https://img/logo1.png");
    assert_eq!(artwork.banners.len(), 1);
    assert_eq!(artwork.thumbs.len(), 1);
}

#[tokio::test]
async fn fetch_movie_artwork_caches_result() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/movies/27205"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "movieposter": [{ "url": "https://img/p1.jpg" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = FanartTvClient::new("fanart-api-key".to_string(), None, Some(server.uri()));
    let first = client.fetch_movie_artwork(27205).await.unwrap();
    let second = client.fetch_movie_artwork(27205).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn api_error_body_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/movies/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "invalid api key"
        })))
        .mount(&server)
        .await;

    let client = FanartTvClient::new("bad-key".to_string(), None, Some(server.uri()));
    let err = client.fetch_movie_artwork(1).await.unwrap_err();
    match err {
        ProviderCallError::Api { message } => assert!(message.contains("invalid api key")),
        other => panic!("expected Api error, got: {other:?}"),
    }
}

#[tokio::test]
async fn http_error_status_is_preserved() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/movies/2"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = FanartTvClient::new("fanart-api-key".to_string(), None, Some(server.uri()));
    let err = client.fetch_movie_artwork(2).await.unwrap_err();
    assert!(err.is_transient());
    match err {
        ProviderCallError::HttpStatus { status, body } => {
            assert_eq!(status.as_u16(), 503);
            assert!(body.contains("maintenance"));
        }
        other => panic!("expected HttpStatus error, got: {other:?}"),
    }
}
