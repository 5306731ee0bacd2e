use serde_json::Value;

#[test]
fn openapi_marks_protected_routes_with_bearer_auth() -> anyhow::Result<()> {
    // Build the OpenAPI document the same way the server does
    let doc = enquiry_desk::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let paths = v
        .get("paths")
        .and_then(Value::as_object)
        .expect("paths must exist");

    for (route, verb) in [
        ("/enquiry", "post"),
        ("/enquiry/{id}/cancel", "patch"),
        ("/enquiry/{id}/admission", "post"),
        ("/admission/{id}/approve", "patch"),
    ] {
        let security = paths
            .get(route)
            .and_then(|p| p.get(verb))
            .and_then(|op| op.get("security"))
            .unwrap_or_else(|| panic!("{verb} {route} must declare security"));
        assert!(security.to_string().contains("bearerAuth"), "{verb} {route}: {security}");
    }

    let health = &paths["/api/health"]["get"];
    assert!(health.get("security").is_none(), "health must stay public");

    Ok(())
}

#[test]
fn openapi_created_by_is_read_only() -> anyhow::Result<()> {
    let doc = enquiry_desk::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let created_by = &v["components"]["schemas"]["EnquiryCreateRequest"]["properties"]["created_by"];
    assert!(!created_by.is_null(), "EnquiryCreateRequest.created_by missing");

    Ok(())
}
