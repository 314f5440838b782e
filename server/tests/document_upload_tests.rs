/// Integration tests for document uploads, serving and attachment.
#[macro_use]
mod common;

use actix_web::http::header;
use actix_web::http::StatusCode;
use actix_web::test;
use common::{multipart_body, register_student, session_cookie, test_app, Reply};
use serde_json::json;

const BOUNDARY: &str = "----admission-test-boundary";

fn multipart_request(
    session_id: Option<&str>,
    slot: Option<&str>,
    file: Option<(&str, &str, &[u8])>,
) -> test::TestRequest {
    let mut req = test::TestRequest::post()
        .uri("/upload-document")
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(multipart_body(BOUNDARY, slot, file));
    if let Some(sid) = session_id {
        req = req.cookie(session_cookie(sid));
    }
    req
}

#[actix_web::test]
async fn test_upload_and_serve_jpeg() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let (user, sid) = register_student(&ctx.state, "kate@example.com").await;

    let photo = vec![0xABu8; 5 * 1024 * 1024];
    let req = multipart_request(
        Some(&sid),
        Some("photo"),
        Some(("passport.jpg", "image/jpeg", &photo)),
    )
    .to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.body["fileName"], "passport.jpg");
    assert_eq!(reply.body["size"], photo.len() as u64);

    let url = reply.body["url"].as_str().unwrap().to_string();
    let prefix = format!("http://localhost/uploads/admission-documents/{}/photo-", user.id);
    assert!(url.starts_with(&prefix), "Unexpected url {}", url);
    assert!(url.ends_with(".jpg"));

    let path = url.trim_start_matches("http://localhost");
    let req = test::TestRequest::get().uri(path).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/jpeg"
    );
    let served = test::read_body(resp).await;
    assert_eq!(served.len(), photo.len());
}

#[actix_web::test]
async fn test_upload_defaults_slot() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let (_, sid) = register_student(&ctx.state, "leo@example.com").await;

    let req = multipart_request(Some(&sid), None, Some(("scan.webp", "image/webp", b"RIFF")))
        .to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::OK);
    let url = reply.body["url"].as_str().unwrap();
    assert!(url.contains("/document-"), "Unexpected url {}", url);
    assert!(url.ends_with(".webp"));
}

#[actix_web::test]
async fn test_upload_rejects_non_images() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let (_, sid) = register_student(&ctx.state, "mia@example.com").await;

    let req = multipart_request(
        Some(&sid),
        Some("photo"),
        Some(("setup.exe", "application/octet-stream", b"MZ\x90\x00")),
    )
    .to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.error(),
        "Only image formats are allowed (JPG, PNG, GIF, WebP)"
    );
}

#[actix_web::test]
async fn test_upload_rejects_large_files() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let (_, sid) = register_student(&ctx.state, "nina@example.com").await;

    let big = vec![0u8; 11 * 1024 * 1024];
    let req = multipart_request(Some(&sid), Some("marksheet"), Some(("big.png", "image/png", &big)))
        .to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error(), "File exceeds the 10 MB upload limit");
}

#[actix_web::test]
async fn test_upload_requires_file_and_session() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let (_, sid) = register_student(&ctx.state, "omar@example.com").await;

    let req = multipart_request(Some(&sid), Some("photo"), None).to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error(), "No file provided");

    let req = multipart_request(None, Some("photo"), Some(("a.png", "image/png", b"png")))
        .to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_missing_upload_is_not_found() {
    let ctx = test_app();
    let app = init_app!(ctx.state);

    let req = test::TestRequest::get()
        .uri("/uploads/admission-documents/nobody/photo-1.png")
        .to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_attach_uploaded_document_to_application() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let (_, sid) = register_student(&ctx.state, "paul@example.com").await;

    let req = multipart_request(
        Some(&sid),
        Some("signature"),
        Some(("sign.png", "image/png", b"\x89PNG")),
    )
    .to_request();
    let upload = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(upload.status, StatusCode::OK);

    let req = test::TestRequest::post()
        .uri("/applications")
        .cookie(session_cookie(&sid))
        .set_json(json!({
            "courseId": "course-1",
            "personalDetails": {
                "firstName": "Paul",
                "email": "paul@example.com",
                "mobileNumber": "9000000000"
            }
        }))
        .to_request();
    let created = Reply::read(test::call_service(&app, req).await).await;
    let id = created.body["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::put()
        .uri(&format!("/applications/{}/documents/signature", id))
        .cookie(session_cookie(&sid))
        .set_json(json!({
            "fileName": upload.body["fileName"],
            "size": upload.body["size"],
            "url": upload.body["url"]
        }))
        .to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(
        reply.body["documents"]["signature"]["url"],
        upload.body["url"]
    );

    let (_, other_sid) = register_student(&ctx.state, "quinn@example.com").await;
    let req = test::TestRequest::put()
        .uri(&format!("/applications/{}/documents/photo", id))
        .cookie(session_cookie(&other_sid))
        .set_json(json!({ "fileName": "x.png", "size": 1, "url": "http://localhost/uploads/x.png" }))
        .to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn test_attach_rejects_descriptors_not_issued_here() {
    let ctx = test_app();
    let app = init_app!(ctx.state);
    let (user, sid) = register_student(&ctx.state, "rosa@example.com").await;
    let (other, other_sid) = register_student(&ctx.state, "sven@example.com").await;

    let req = test::TestRequest::post()
        .uri("/applications")
        .cookie(session_cookie(&sid))
        .set_json(json!({
            "courseId": "course-1",
            "personalDetails": {
                "firstName": "Rosa",
                "email": "rosa@example.com",
                "mobileNumber": "9000000001"
            }
        }))
        .to_request();
    let created = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(created.status, StatusCode::CREATED);
    let id = created.body["id"].as_str().unwrap().to_string();
    let uri = format!("/applications/{}/documents/passportPhoto", id);

    let req = test::TestRequest::put()
        .uri(&uri)
        .cookie(session_cookie(&sid))
        .set_json(json!({
            "fileName": "payload.exe",
            "sizeBytes": 52428800,
            "url": "http://evil.example/payload.exe"
        }))
        .to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let req = test::TestRequest::put()
        .uri(&uri)
        .cookie(session_cookie(&sid))
        .set_json(json!({
            "fileName": "photo.png",
            "sizeBytes": 2048,
            "url": "http://evil.example/photo.png"
        }))
        .to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error(), "Document URL was not issued by this server");

    let own = format!(
        "http://localhost/uploads/admission-documents/{}/photo-1.png",
        user.id
    );
    let req = test::TestRequest::put()
        .uri(&uri)
        .cookie(session_cookie(&sid))
        .set_json(json!({ "fileName": "photo.png", "sizeBytes": 52428800, "url": own }))
        .to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error(), "File exceeds the 10 MB upload limit");

    // Another applicant's upload cannot be borrowed
    let req = multipart_request(
        Some(&other_sid),
        Some("photo"),
        Some(("theirs.png", "image/png", b"\x89PNG")),
    )
    .to_request();
    let theirs = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(theirs.status, StatusCode::OK);
    assert!(theirs.body["url"].as_str().unwrap().contains(&other.id));

    let req = test::TestRequest::put()
        .uri(&uri)
        .cookie(session_cookie(&sid))
        .set_json(json!({
            "fileName": "theirs.png",
            "size": theirs.body["size"],
            "url": theirs.body["url"]
        }))
        .to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri(&format!("/applications/{}", id))
        .cookie(session_cookie(&sid))
        .to_request();
    let reply = Reply::read(test::call_service(&app, req).await).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body["documents"].as_object().unwrap().is_empty());
}
