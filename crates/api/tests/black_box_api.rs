use chrono::{Datelike, Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Build app (same router as prod), but bind to an ephemeral port.
        let app = faktura_api::app::build_app().await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Register a company and return its id (the value of the company header).
async fn register_company(client: &reqwest::Client, base_url: &str, small_business: bool) -> String {
    let res = client
        .post(format!("{}/companies", base_url))
        .json(&json!({
            "name": "Muster GmbH",
            "address": {
                "street": "Musterstr. 1",
                "postal_code": "12345",
                "city": "Berlin",
                "country": "Deutschland"
            },
            "small_business": small_business,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn get_customer_eventually(
    client: &reqwest::Client,
    base_url: &str,
    company_id: &str,
    id: &str,
) -> serde_json::Value {
    // The API is intentionally eventual-consistent (command path vs projection
    // update). Poll briefly until the projection catches up.
    for _ in 0..50 {
        let res = client
            .get(format!("{}/customers/{}", base_url, id))
            .header("X-Company-Id", company_id)
            .send()
            .await
            .unwrap();

        if res.status() == StatusCode::OK {
            return res.json().await.unwrap();
        }

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("customer did not become visible in projection within timeout");
}

async fn get_invoice_eventually(
    client: &reqwest::Client,
    base_url: &str,
    company_id: &str,
    id: &str,
    expect_status: &str,
) -> serde_json::Value {
    for _ in 0..50 {
        let res = client
            .get(format!("{}/invoices/{}", base_url, id))
            .header("X-Company-Id", company_id)
            .send()
            .await
            .unwrap();

        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if body["status"] == expect_status {
                return body;
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("invoice did not reach status {expect_status} within timeout");
}

#[tokio::test]
async fn company_header_required_for_scoped_endpoints() {
    let srv = TestServer::spawn().await;

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn company_context_is_derived_from_header() {
    let srv = TestServer::spawn().await;

    let client = reqwest::Client::new();
    let company_id = register_company(&client, &srv.base_url, false).await;

    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .header("X-Company-Id", &company_id)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["company_id"].as_str().unwrap(), company_id);
}

#[tokio::test]
async fn customers_receive_sequential_document_numbers() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let company_id = register_company(&client, &srv.base_url, false).await;
    let year = Utc::now().year();

    let mut ids = Vec::new();
    for (i, name) in ["Erika Musterfrau", "Max Mustermann"].iter().enumerate() {
        let res = client
            .post(format!("{}/customers", srv.base_url))
            .header("X-Company-Id", &company_id)
            .json(&json!({
                "name": name,
                "kind": "business",
                "address": {
                    "street": "Musterstr. 1",
                    "postal_code": "12345",
                    "city": "Berlin",
                    "country": "Deutschland"
                },
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(
            body["number"].as_str().unwrap(),
            format!("KU-{}-{:04}", year, i + 1)
        );
        ids.push(body["id"].as_str().unwrap().to_string());
    }

    // The assigned number is visible on the read model, along with the
    // VAT-number prompt for a German business customer without one.
    let customer = get_customer_eventually(&client, &srv.base_url, &company_id, &ids[0]).await;
    assert_eq!(
        customer["number"].as_str().unwrap(),
        format!("KU-{}-0001", year)
    );
    assert_eq!(customer["needs_vat_number"], true);
    assert_eq!(
        customer["full_address"].as_str().unwrap(),
        "Musterstr. 1, 12345 Berlin, Deutschland"
    );
}

#[tokio::test]
async fn company_isolation_blocks_cross_company_reads() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let company_a = register_company(&client, &srv.base_url, false).await;
    let company_b = register_company(&client, &srv.base_url, false).await;

    let res = client
        .post(format!("{}/customers", srv.base_url))
        .header("X-Company-Id", &company_a)
        .json(&json!({ "name": "Erika Musterfrau", "kind": "private" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    // Visible under company A.
    get_customer_eventually(&client, &srv.base_url, &company_a, &id).await;

    // Invisible under company B.
    let res = client
        .get(format!("{}/customers/{}", srv.base_url, id))
        .header("X-Company-Id", &company_b)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Both companies start their own sequence at 0001.
    let res = client
        .post(format!("{}/customers", srv.base_url))
        .header("X-Company-Id", &company_b)
        .json(&json!({ "name": "Max Mustermann", "kind": "private" }))
        .send()
        .await
        .unwrap();
    let created: serde_json::Value = res.json().await.unwrap();
    assert!(
        created["number"]
            .as_str()
            .unwrap()
            .ends_with("-0001")
    );
}

#[tokio::test]
async fn invoice_lifecycle_create_send_pay() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let company_id = register_company(&client, &srv.base_url, false).await;
    let year = Utc::now().year();

    let res = client
        .post(format!("{}/customers", srv.base_url))
        .header("X-Company-Id", &company_id)
        .json(&json!({ "name": "Erika Musterfrau", "kind": "business" }))
        .send()
        .await
        .unwrap();
    let customer: serde_json::Value = res.json().await.unwrap();
    let customer_id = customer["id"].as_str().unwrap().to_string();
    get_customer_eventually(&client, &srv.base_url, &company_id, &customer_id).await;

    let res = client
        .post(format!("{}/products", srv.base_url))
        .header("X-Company-Id", &company_id)
        .json(&json!({
            "name": "Beratung",
            "unit": "Stunde",
            "unit_price": 10_000,
            "vat_rate_bps": 1900,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let product: serde_json::Value = res.json().await.unwrap();
    let product_id = product["id"].as_str().unwrap().to_string();

    // Create the invoice.
    let due = (Utc::now() + ChronoDuration::days(14)).to_rfc3339();
    let res = client
        .post(format!("{}/invoices", srv.base_url))
        .header("X-Company-Id", &company_id)
        .json(&json!({
            "customer_id": customer_id,
            "due_date": due,
            "lines": [{
                "product_id": product_id,
                "description": "Beratung",
                "quantity": 2,
                "unit_price": 10_000,
                "vat_rate_bps": 1900,
            }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let invoice: serde_json::Value = res.json().await.unwrap();
    let invoice_id = invoice["id"].as_str().unwrap().to_string();
    assert_eq!(
        invoice["number"].as_str().unwrap(),
        format!("RE-{}-0001", year)
    );

    let body = get_invoice_eventually(&client, &srv.base_url, &company_id, &invoice_id, "draft").await;
    assert_eq!(body["net"], 20_000);
    assert_eq!(body["vat"], 3_800);
    assert_eq!(body["gross"], 23_800);

    // Send it.
    let res = client
        .post(format!("{}/invoices/{}/send", srv.base_url, invoice_id))
        .header("X-Company-Id", &company_id)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Pay in full.
    let res = client
        .post(format!("{}/invoices/{}/payments", srv.base_url, invoice_id))
        .header("X-Company-Id", &company_id)
        .json(&json!({ "amount": 23_800 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = get_invoice_eventually(&client, &srv.base_url, &company_id, &invoice_id, "paid").await;
    assert_eq!(body["outstanding"], 0);

    // Customer metrics reflect the paid invoice.
    for _ in 0..50 {
        let res = client
            .get(format!(
                "{}/customers/{}/metrics",
                srv.base_url, customer_id
            ))
            .header("X-Company-Id", &company_id)
            .send()
            .await
            .unwrap();
        if res.status() == StatusCode::OK {
            let metrics: serde_json::Value = res.json().await.unwrap();
            if metrics["revenue"] == 23_800 {
                assert_eq!(metrics["invoice_count"], 1);
                assert_eq!(metrics["outstanding"], 0);
                return;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("customer metrics did not catch up within timeout");
}

#[tokio::test]
async fn small_business_invoices_carry_no_vat() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let company_id = register_company(&client, &srv.base_url, true).await;

    // Wait until the company read model (and its Kleinunternehmer flag) is
    // visible, since invoice creation consults it.
    for _ in 0..50 {
        let res = client
            .get(format!("{}/companies/{}", srv.base_url, company_id))
            .header("X-Company-Id", &company_id)
            .send()
            .await
            .unwrap();
        if res.status() == StatusCode::OK {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let res = client
        .post(format!("{}/customers", srv.base_url))
        .header("X-Company-Id", &company_id)
        .json(&json!({ "name": "Erika Musterfrau", "kind": "private" }))
        .send()
        .await
        .unwrap();
    let customer: serde_json::Value = res.json().await.unwrap();
    let customer_id = customer["id"].as_str().unwrap().to_string();
    get_customer_eventually(&client, &srv.base_url, &company_id, &customer_id).await;

    let res = client
        .post(format!("{}/products", srv.base_url))
        .header("X-Company-Id", &company_id)
        .json(&json!({
            "name": "Beratung",
            "unit": "Stunde",
            "unit_price": 10_000,
            "vat_rate_bps": 1900,
        }))
        .send()
        .await
        .unwrap();
    let product: serde_json::Value = res.json().await.unwrap();
    let product_id = product["id"].as_str().unwrap().to_string();

    let due = (Utc::now() + ChronoDuration::days(14)).to_rfc3339();
    let res = client
        .post(format!("{}/invoices", srv.base_url))
        .header("X-Company-Id", &company_id)
        .json(&json!({
            "customer_id": customer_id,
            "due_date": due,
            "lines": [{
                "product_id": product_id,
                "description": "Beratung",
                "quantity": 1,
                "unit_price": 10_000,
                "vat_rate_bps": 1900,
            }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let invoice: serde_json::Value = res.json().await.unwrap();
    let invoice_id = invoice["id"].as_str().unwrap().to_string();

    let body = get_invoice_eventually(&client, &srv.base_url, &company_id, &invoice_id, "draft").await;
    assert_eq!(body["net"], 10_000);
    assert_eq!(body["vat"], 0);
    assert_eq!(body["gross"], 10_000);
}

#[tokio::test]
async fn offer_lifecycle_and_conversion_to_invoice() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let company_id = register_company(&client, &srv.base_url, false).await;
    let year = Utc::now().year();

    let res = client
        .post(format!("{}/customers", srv.base_url))
        .header("X-Company-Id", &company_id)
        .json(&json!({ "name": "Erika Musterfrau", "kind": "business" }))
        .send()
        .await
        .unwrap();
    let customer: serde_json::Value = res.json().await.unwrap();
    let customer_id = customer["id"].as_str().unwrap().to_string();
    get_customer_eventually(&client, &srv.base_url, &company_id, &customer_id).await;

    let res = client
        .post(format!("{}/products", srv.base_url))
        .header("X-Company-Id", &company_id)
        .json(&json!({
            "name": "Beratung",
            "unit": "Stunde",
            "unit_price": 50_000,
            "vat_rate_bps": 1900,
        }))
        .send()
        .await
        .unwrap();
    let product: serde_json::Value = res.json().await.unwrap();
    let product_id = product["id"].as_str().unwrap().to_string();

    // Create and send the offer.
    let res = client
        .post(format!("{}/offers", srv.base_url))
        .header("X-Company-Id", &company_id)
        .json(&json!({
            "customer_id": customer_id,
            "lines": [{
                "product_id": product_id,
                "description": "Projekt",
                "quantity": 1,
                "unit_price": 50_000,
                "vat_rate_bps": 1900,
            }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let offer: serde_json::Value = res.json().await.unwrap();
    let offer_id = offer["id"].as_str().unwrap().to_string();
    assert_eq!(
        offer["number"].as_str().unwrap(),
        format!("AN-{}-0001", year)
    );

    for action in ["send", "accept"] {
        // Wait for the offer projection before the next status command needs it.
        for _ in 0..50 {
            let res = client
                .get(format!("{}/offers/{}", srv.base_url, offer_id))
                .header("X-Company-Id", &company_id)
                .send()
                .await
                .unwrap();
            if res.status() == StatusCode::OK {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let res = client
            .post(format!("{}/offers/{}/{}", srv.base_url, offer_id, action))
            .header("X-Company-Id", &company_id)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK, "offer action {action} failed");
    }

    // Converting before the accepted status reaches the projection would be
    // rejected, so poll until it is visible.
    for _ in 0..50 {
        let res = client
            .get(format!("{}/offers/{}", srv.base_url, offer_id))
            .header("X-Company-Id", &company_id)
            .send()
            .await
            .unwrap();
        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if body["status"] == "accepted" {
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let due = (Utc::now() + ChronoDuration::days(30)).to_rfc3339();
    let res = client
        .post(format!("{}/offers/{}/invoice", srv.base_url, offer_id))
        .header("X-Company-Id", &company_id)
        .json(&json!({ "due_date": due }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let invoice: serde_json::Value = res.json().await.unwrap();
    assert_eq!(
        invoice["number"].as_str().unwrap(),
        format!("RE-{}-0001", year)
    );

    let invoice_id = invoice["id"].as_str().unwrap().to_string();
    let body = get_invoice_eventually(&client, &srv.base_url, &company_id, &invoice_id, "draft").await;
    assert_eq!(body["net"], 50_000);
}
