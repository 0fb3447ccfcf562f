use super::*;
use crate::service::tests::{enrol, service};
use serde_json::{json, Value};
use warp::test::request;

async fn app() -> (AppState, BoxedFilter<(Response,)>) {
    let state = AppState {
        service: service().await,
        config: Arc::new(Config::default()),
        schedule_changed: Arc::new(Notify::new()),
    };
    let filter = routes(state.clone());
    (state, filter)
}

fn body(res: &warp::http::Response<warp::hyper::body::Bytes>) -> Value {
    serde_json::from_slice(res.body()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (_, api) = app().await;
    let res = request().method("GET").path("/health").reply(&api).await;
    assert_eq!(res.status(), 200);
    assert_eq!(body(&res)["status"], "ok");
}

#[tokio::test]
async fn test_register_and_lookup_student() {
    let (_, api) = app().await;
    let res = request()
        .method("POST")
        .path("/api/students/register")
        .json(&json!({
            "name": "Ada Lovelace",
            "rollNumber": "cs-01",
            "className": "Math101",
            "referenceImage": "data:image/jpeg;base64,/9j/"
        }))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 201);
    let created = body(&res);
    assert_eq!(created["student"]["rollNumber"], "CS-01");
    assert!(created["student"].get("referenceImage").is_none());

    let dup = request()
        .method("POST")
        .path("/api/students/register")
        .json(&json!({
            "name": "Someone Else",
            "rollNumber": "CS-01",
            "className": "Physics",
            "referenceImage": "x"
        }))
        .reply(&api)
        .await;
    assert_eq!(dup.status(), 400);

    let found = request().method("GET").path("/api/students/cs-01").reply(&api).await;
    assert_eq!(found.status(), 200);
    assert_eq!(body(&found)["name"], "Ada Lovelace");

    let missing = request().method("GET").path("/api/students/NOPE").reply(&api).await;
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn test_register_missing_fields() {
    let (state, api) = app().await;
    let res = request()
        .method("POST")
        .path("/api/students/register")
        .json(&json!({ "name": "Ada", "rollNumber": "  " }))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 400);
    assert_eq!(body(&res)["error"], "Missing required fields");
    assert!(state.store().list_students(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_descriptor_and_reference() {
    let (state, api) = app().await;
    enrol(state.store(), "R1", "Ada", "Math101", 0.0).await;

    let res = request()
        .method("POST")
        .path("/api/students/r1/descriptor")
        .json(&json!({ "faceDescriptor": [0.1, 0.2, 0.3] }))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 200);
    assert_eq!(body(&res)["student"]["hasDescriptor"], true);

    let reference = request().method("GET").path("/api/students/R1/reference").reply(&api).await;
    let reference = body(&reference);
    assert_eq!(reference["faceDescriptor"].as_array().unwrap().len(), 3);
    assert_eq!(reference["referenceImage"], "img");

    let empty = request()
        .method("POST")
        .path("/api/students/R1/descriptor")
        .json(&json!({ "faceDescriptor": [] }))
        .reply(&api)
        .await;
    assert_eq!(empty.status(), 400);

    let unknown = request()
        .method("POST")
        .path("/api/students/R9/descriptor")
        .json(&json!({ "faceDescriptor": [0.1] }))
        .reply(&api)
        .await;
    assert_eq!(unknown.status(), 404);
}

#[tokio::test]
async fn test_class_end_before_start_rejected() {
    let (state, api) = app().await;
    let res = request()
        .method("POST")
        .path("/api/classes/add")
        .json(&json!({ "className": "Math101", "startTime": "10:00", "endTime": "09:00" }))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 400);
    assert_eq!(body(&res)["error"], "End time must be after start time");
    assert!(state.store().list_classes(true).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_class_bad_day_rejected() {
    let (_, api) = app().await;
    let res = request()
        .method("POST")
        .path("/api/classes/add")
        .json(&json!({
            "className": "Math101",
            "startTime": "09:00",
            "endTime": "10:00",
            "dayOfWeek": "Funday"
        }))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn test_class_lifecycle() {
    let (state, api) = app().await;
    let res = request()
        .method("POST")
        .path("/api/classes/add")
        .json(&json!({
            "className": "Math101",
            "startTime": "09:00",
            "endTime": "10:00",
            "dayOfWeek": "monday"
        }))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 201);
    let class = body(&res)["class"].clone();
    assert_eq!(class["duration"], 60);
    assert_eq!(class["dayOfWeek"], "Monday");
    let id = class["id"].as_str().unwrap().to_string();

    // The scheduler is woken on every change.
    tokio::time::timeout(std::time::Duration::from_secs(1), state.schedule_changed.notified())
        .await
        .unwrap();

    let updated = request()
        .method("PUT")
        .path(&format!("/api/classes/{id}"))
        .json(&json!({ "endTime": "10:30" }))
        .reply(&api)
        .await;
    assert_eq!(updated.status(), 200);
    assert_eq!(body(&updated)["class"]["duration"], 90);
    assert_eq!(body(&updated)["class"]["startTime"], "09:00");

    let list = request().method("GET").path("/api/classes").reply(&api).await;
    assert_eq!(body(&list).as_array().unwrap().len(), 1);

    let deleted = request()
        .method("DELETE")
        .path(&format!("/api/classes/{id}"))
        .reply(&api)
        .await;
    assert_eq!(deleted.status(), 200);
    let again = request()
        .method("DELETE")
        .path(&format!("/api/classes/{id}"))
        .reply(&api)
        .await;
    assert_eq!(again.status(), 404);

    let missing = request()
        .method("PUT")
        .path("/api/classes/nope")
        .json(&json!({ "className": "X" }))
        .reply(&api)
        .await;
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn test_mark_attendance() {
    let (state, api) = app().await;
    let ada = enrol(state.store(), "R1", "Ada", "Math101", 0.0).await;

    let unknown = request()
        .method("POST")
        .path("/api/attendance/mark")
        .json(&json!({
            "studentId": "ghost",
            "rollNumber": "R9",
            "className": "Math101",
            "classId": "c1",
            "presenceDuration": 3000,
            "classDuration": 3600
        }))
        .reply(&api)
        .await;
    assert_eq!(unknown.status(), 404);

    let missing = request()
        .method("POST")
        .path("/api/attendance/mark")
        .json(&json!({ "studentId": ada.id, "className": "Math101" }))
        .reply(&api)
        .await;
    assert_eq!(missing.status(), 400);

    let mark = json!({
        "studentId": ada.id,
        "rollNumber": "R1",
        "className": "Math101",
        "classId": "c1",
        "presenceDuration": 2760,
        "classDuration": 3600,
        "detections": [
            { "timestamp": "2026-10-19T09:00:00Z", "confidence": 0.82, "engagement": true }
        ],
        "engagementScore": 75,
        "engagementData": { "lookingForward": 3, "lookingAway": 1, "totalFrames": 4, "score": 75 }
    });
    let first = request().method("POST").path("/api/attendance/mark").json(&mark).reply(&api).await;
    assert_eq!(first.status(), 200);
    let record = body(&first)["attendance"].clone();
    assert_eq!(record["status"], "Present");
    assert_eq!(record["requiredDuration"], 2700);
    assert_eq!(record["engagementData"]["lookingForward"], 3);

    request().method("POST").path("/api/attendance/mark").json(&mark).reply(&api).await;
    let all = request().method("GET").path("/api/attendance").reply(&api).await;
    assert_eq!(body(&all).as_array().unwrap().len(), 1);

    let stats = request()
        .method("GET")
        .path("/api/attendance/stats?className=Math101")
        .reply(&api)
        .await;
    let stats = body(&stats);
    assert_eq!(stats["totalRecords"], 1);
    assert_eq!(stats["presentPercentage"], 100.0);

    let today = request().method("GET").path("/api/attendance/today/Math101").reply(&api).await;
    assert_eq!(body(&today).as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_bad_date_filter() {
    let (_, api) = app().await;
    let res = request()
        .method("GET")
        .path("/api/attendance?date=19-10-2026")
        .reply(&api)
        .await;
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn test_efficiency_reports() {
    let (state, api) = app().await;
    let ada = enrol(state.store(), "R1", "Ada", "Math101", 0.0).await;
    let bob = enrol(state.store(), "R2", "Bob", "Math101", 1.0).await;

    for (student, class_id, presence) in [
        (&ada, "c1", 3000),
        (&ada, "c2", 2800),
        (&ada, "c3", 100),
        (&bob, "c1", 3000),
    ] {
        let res = request()
            .method("POST")
            .path("/api/attendance/mark")
            .json(&json!({
                "studentId": student.id,
                "rollNumber": student.roll_number,
                "className": "Math101",
                "classId": class_id,
                "presenceDuration": presence,
                "classDuration": 3600,
                "engagementScore": 50
            }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), 200);
    }

    let ada_report = request()
        .method("GET")
        .path(&format!("/api/efficiency/{}", ada.id))
        .reply(&api)
        .await;
    let ada_report = body(&ada_report);
    assert_eq!(ada_report["totalClasses"], 3);
    assert_eq!(ada_report["classesAttended"], 2);
    assert_eq!(ada_report["efficiency"], 66.67);
    assert_eq!(ada_report["attendanceRecords"].as_array().unwrap().len(), 3);

    let by_roll = request().method("GET").path("/api/efficiency/roll/r2").reply(&api).await;
    assert_eq!(body(&by_roll)["efficiency"], 100.0);

    let bulk = request()
        .method("GET")
        .path("/api/efficiency?className=Math101")
        .reply(&api)
        .await;
    let bulk = body(&bulk);
    let rows = bulk.as_array().unwrap();
    assert_eq!(rows[0]["rollNumber"], "R2");
    assert_eq!(rows[1]["rollNumber"], "R1");
    assert!(rows[0].get("attendanceRecords").is_none());

    let missing = request().method("GET").path("/api/efficiency/ghost").reply(&api).await;
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn test_monitor_flow() {
    let (state, api) = app().await;
    enrol(state.store(), "R1", "Ada", "Math101", 0.0).await;
    let res = request()
        .method("POST")
        .path("/api/classes/add")
        .json(&json!({ "className": "Math101", "startTime": "09:00", "endTime": "10:00" }))
        .reply(&api)
        .await;
    let class_id = body(&res)["class"]["id"].as_str().unwrap().to_string();

    let not_open = request()
        .method("POST")
        .path(&format!("/api/monitor/{class_id}/frames"))
        .json(&json!({ "detections": [] }))
        .reply(&api)
        .await;
    assert_eq!(not_open.status(), 404);

    let started = request()
        .method("POST")
        .path(&format!("/api/monitor/{class_id}/start"))
        .reply(&api)
        .await;
    assert_eq!(started.status(), 200);
    assert_eq!(body(&started)["seeded"], 1);

    for ts in ["2026-10-19T09:00:00Z", "2026-10-19T09:00:10Z"] {
        let frame = request()
            .method("POST")
            .path(&format!("/api/monitor/{class_id}/frames"))
            .json(&json!({
                "timestamp": ts,
                "detections": [{
                    "landmarks": {
                        "leftEye": { "x": 40.0, "y": 50.0 },
                        "rightEye": { "x": 60.0, "y": 50.0 },
                        "nose": { "x": 50.0, "y": 52.0 },
                        "leftMouth": { "x": 42.0, "y": 70.0 },
                        "rightMouth": { "x": 58.0, "y": 70.0 }
                    },
                    "descriptor": [0.01, 0.0]
                }]
            }))
            .reply(&api)
            .await;
        assert_eq!(frame.status(), 200);
    }

    let live = request()
        .method("GET")
        .path(&format!("/api/monitor/{class_id}"))
        .reply(&api)
        .await;
    let live = body(&live);
    assert_eq!(live["students"][0]["cumulativeSeconds"], 10);
    assert_eq!(live["students"][0]["engagement"]["score"], 100);

    let stopped = request()
        .method("POST")
        .path(&format!("/api/monitor/{class_id}/stop"))
        .reply(&api)
        .await;
    assert_eq!(stopped.status(), 200);
    let stopped = body(&stopped);
    assert_eq!(stopped["records"][0]["presenceDuration"], 10);
    assert_eq!(stopped["records"][0]["status"], "Absent");

    let active = request().method("GET").path("/api/monitor").reply(&api).await;
    assert!(body(&active).as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_route_and_bad_json() {
    let (_, api) = app().await;
    let res = request().method("GET").path("/api/nothing").reply(&api).await;
    assert_eq!(res.status(), 404);

    let res = request()
        .method("POST")
        .path("/api/classes/add")
        .header("content-type", "application/json")
        .body("{not json")
        .reply(&api)
        .await;
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn test_path_parameters_are_percent_decoded() {
    let (state, api) = app().await;
    let ada = enrol(state.store(), "R1", "Ada", "Math 101", 0.0).await;

    let res = request()
        .method("POST")
        .path("/api/attendance/mark")
        .json(&json!({
            "studentId": ada.id,
            "rollNumber": "R1",
            "className": "Math 101",
            "classId": "c1",
            "presenceDuration": 3000,
            "classDuration": 3600
        }))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 200);

    let today = request()
        .method("GET")
        .path("/api/attendance/today/Math%20101")
        .reply(&api)
        .await;
    assert_eq!(today.status(), 200);
    let rows = body(&today);
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["className"], "Math 101");

    let bad = request()
        .method("GET")
        .path("/api/attendance/today/%FF%FE")
        .reply(&api)
        .await;
    assert_eq!(bad.status(), 400);
}
