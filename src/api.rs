use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use serde_json::{Value, json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::achievements::award_achievements;
use crate::auth::{AuthToken, BearerToken, Permission, User};
use crate::db::{
    add_completed_module, authenticate_user, create_achievement, create_auth_token, create_lesson,
    create_module, create_user, delete_lesson, delete_module,
    get_all_achievements, get_all_modules, get_completed_module_ids, get_lesson,
    get_lessons_by_module, get_module, get_unlocked_achievement_ids, get_user,
    invalidate_auth_token, update_lesson, update_module,
};
use crate::models::{Achievement, ContentBlock, Lesson, Level, Module};
use crate::validation::AppErrorExt;
use crate::validation::JsonValidateExt;
use crate::validation::PermissionCheckExt;
use crate::validation::ValidationResponse;

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub points: i64,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role.to_string(),
            points: user.points,
        }
    }
}

#[derive(Deserialize, Validate, Clone)]
pub struct RegisterRequest {
    #[validate(length(min = 1, message = "Name is required"))]
    name: String,
    #[validate(email(message = "A valid email address is required"))]
    email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    password: String,
}

#[post("/users", data = "<registration>")]
pub async fn api_register(
    registration: Json<RegisterRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<UserData>>, Custom<Json<ValidationResponse>>> {
    let validated = registration.validate_custom()?;
    let email = validated.email.trim().to_lowercase();

    let user_id = create_user(db, validated.name.trim(), &email, &validated.password, "user")
        .await
        .validate_custom()?;

    let user = get_user(db, user_id).await.validate_custom()?;

    Ok(Custom(Status::Created, Json(UserData::from(user))))
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "A valid email address is required"))]
    email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserData,
}

#[post("/users/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LoginResponse>, Custom<Json<ValidationResponse>>> {
    use chrono::Utc;

    let validated = login.validate_custom()?;
    let email = validated.email.trim().to_lowercase();

    match authenticate_user(db, &email, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            let token = AuthToken::generate();
            let expires_at = Utc::now() + chrono::Duration::days(1);

            create_auth_token(db, user.id, &token, expires_at.naive_utc())
                .await
                .validate_custom()?;

            Ok(Json(LoginResponse {
                token,
                user: UserData::from(user),
            }))
        }
        None => Err(Custom(
            Status::BadRequest,
            Json(ValidationResponse::with_error(
                "credentials",
                "Invalid credentials",
            )),
        )),
    }
}

#[post("/users/logout")]
pub async fn api_logout(token: BearerToken, db: &State<Pool<Sqlite>>) -> Result<Status, Status> {
    invalidate_auth_token(db, &token.0).await?;
    Ok(Status::Ok)
}

#[get("/modules")]
pub async fn api_get_modules(db: &State<Pool<Sqlite>>) -> Result<Json<Vec<Module>>, Status> {
    let modules = get_all_modules(db).await?;
    Ok(Json(modules))
}

#[get("/modules/<id>")]
pub async fn api_get_module(id: i64, db: &State<Pool<Sqlite>>) -> Result<Json<Module>, Status> {
    let module = get_module(db, id).await?;
    Ok(Json(module))
}

#[derive(Deserialize, Validate, Clone)]
pub struct CreateModuleRequest {
    #[validate(length(min = 1, message = "Title is required"))]
    title: String,
    #[validate(length(min = 1, message = "Description is required"))]
    description: String,
    #[validate(length(min = 1, message = "Category is required"))]
    category: String,
    level: String,
    lessons: Option<i64>,
}

#[post("/modules", data = "<request>")]
pub async fn api_create_module(
    request: Json<CreateModuleRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<Module>>, Custom<Json<ValidationResponse>>> {
    user.require_permission(Permission::ManageModules)
        .validate_custom()?;

    let validated = request.validate_custom()?;
    let level = Level::from_str(&validated.level).validate_custom()?;

    let module_id = create_module(
        db,
        &validated.title,
        &validated.description,
        &validated.category,
        &level,
        validated.lessons.unwrap_or(0),
    )
    .await
    .validate_custom()?;

    let module = get_module(db, module_id).await.validate_custom()?;

    Ok(Custom(Status::Created, Json(module)))
}

#[derive(Deserialize)]
pub struct UpdateModuleRequest {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    level: Option<String>,
    lessons: Option<i64>,
}

#[put("/modules/<id>", data = "<request>")]
pub async fn api_update_module(
    id: i64,
    request: Json<UpdateModuleRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Module>, Status> {
    user.require_permission(Permission::ManageModules)?;

    let existing = get_module(db, id).await?;

    let level = match &request.level {
        Some(level) => Level::from_str(level)?,
        None => existing.level,
    };

    update_module(
        db,
        id,
        request.title.as_deref().unwrap_or(&existing.title),
        request
            .description
            .as_deref()
            .unwrap_or(&existing.description),
        request.category.as_deref().unwrap_or(&existing.category),
        &level,
        request.lessons.unwrap_or(existing.lessons),
    )
    .await?;

    let updated = get_module(db, id).await?;
    Ok(Json(updated))
}

#[delete("/modules/<id>")]
pub async fn api_delete_module(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Value>, Status> {
    user.require_permission(Permission::ManageModules)?;

    delete_module(db, id).await?;

    Ok(Json(json!({ "message": "Module deleted successfully" })))
}

#[derive(Serialize, Deserialize)]
pub struct ModuleLessonsResponse {
    pub module: Module,
    pub lessons: Vec<Lesson>,
}

#[get("/lessons/by-module/<module_id>")]
pub async fn api_get_lessons_by_module(
    module_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ModuleLessonsResponse>, Status> {
    user.require_permission(Permission::ViewLessons)?;

    let module = get_module(db, module_id).await?;
    let lessons = get_lessons_by_module(db, module_id).await?;

    Ok(Json(ModuleLessonsResponse { module, lessons }))
}

#[derive(Deserialize, Validate, Clone)]
pub struct CreateLessonRequest {
    module_id: i64,
    #[validate(length(min = 1, message = "Title is required"))]
    title: String,
    position: i64,
    content: Vec<ContentBlock>,
}

#[post("/lessons", data = "<request>")]
pub async fn api_create_lesson(
    request: Json<CreateLessonRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<Lesson>>, Custom<Json<ValidationResponse>>> {
    user.require_permission(Permission::ManageLessons)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    // The owning module must exist before content hangs off it.
    get_module(db, validated.module_id).await.validate_custom()?;

    let lesson_id = create_lesson(
        db,
        validated.module_id,
        &validated.title,
        validated.position,
        &validated.content,
    )
    .await
    .validate_custom()?;

    let lesson = get_lesson(db, lesson_id).await.validate_custom()?;

    Ok(Custom(Status::Created, Json(lesson)))
}

#[derive(Deserialize)]
pub struct UpdateLessonRequest {
    title: Option<String>,
    position: Option<i64>,
    content: Option<Vec<ContentBlock>>,
}

#[put("/lessons/<id>", data = "<request>")]
pub async fn api_update_lesson(
    id: i64,
    request: Json<UpdateLessonRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Lesson>, Status> {
    user.require_permission(Permission::ManageLessons)?;

    let existing = get_lesson(db, id).await?;

    update_lesson(
        db,
        id,
        request.title.as_deref().unwrap_or(&existing.title),
        request.position.unwrap_or(existing.position),
        request.content.as_deref(),
    )
    .await?;

    let updated = get_lesson(db, id).await?;
    Ok(Json(updated))
}

#[delete("/lessons/<id>")]
pub async fn api_delete_lesson(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Value>, Status> {
    user.require_permission(Permission::ManageLessons)?;

    delete_lesson(db, id).await?;

    Ok(Json(json!({ "message": "Lesson deleted successfully" })))
}

#[get("/achievements")]
pub async fn api_get_achievements(
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Achievement>>, Status> {
    let achievements = get_all_achievements(db).await?;
    Ok(Json(achievements))
}

#[derive(Deserialize, Validate, Clone)]
pub struct CreateAchievementRequest {
    #[validate(length(min = 1, message = "Title is required"))]
    title: String,
    #[validate(length(min = 1, message = "Description is required"))]
    description: String,
    points: Option<i64>,
    #[validate(length(min = 1, message = "Criteria key is required"))]
    criteria_key: String,
}

#[post("/achievements", data = "<request>")]
pub async fn api_create_achievement(
    request: Json<CreateAchievementRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<Achievement>>, Custom<Json<ValidationResponse>>> {
    user.require_permission(Permission::ManageAchievements)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    let achievement_id = create_achievement(
        db,
        &validated.title,
        &validated.description,
        validated.points.unwrap_or(50),
        &validated.criteria_key,
    )
    .await
    .validate_custom()?;

    let achievements = get_all_achievements(db).await.validate_custom()?;
    let achievement = achievements
        .into_iter()
        .find(|a| a.id == achievement_id)
        .ok_or_else(|| {
            Custom(
                Status::InternalServerError,
                Json(ValidationResponse::with_error(
                    "server",
                    "Achievement vanished after insert",
                )),
            )
        })?;

    Ok(Custom(Status::Created, Json(achievement)))
}

#[derive(Serialize, Deserialize)]
pub struct ProgressResponse {
    pub completed_modules: Vec<i64>,
    pub unlocked_achievements: Vec<i64>,
    pub points: i64,
}

#[get("/progress")]
pub async fn api_get_progress(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ProgressResponse>, Status> {
    user.require_permission(Permission::TrackProgress)?;

    let completed_modules = get_completed_module_ids(db, user.id).await?;
    let unlocked_achievements = get_unlocked_achievement_ids(db, user.id).await?;

    Ok(Json(ProgressResponse {
        completed_modules,
        unlocked_achievements,
        points: user.points,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct CompleteModuleResponse {
    pub message: String,
    pub completed_modules: Vec<i64>,
    pub unlocked_achievements: Vec<i64>,
    pub points: i64,
}

#[post("/progress/modules/<module_id>/complete")]
pub async fn api_complete_module(
    module_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CompleteModuleResponse>, Status> {
    user.require_permission(Permission::TrackProgress)?;

    get_module(db, module_id).await?;

    let newly_completed = add_completed_module(db, user.id, module_id).await?;

    if newly_completed {
        // Evaluation failures are logged but never surface to the caller:
        // the completion itself already persisted.
        if let Err(err) = award_achievements(db, user.id).await {
            err.log_and_record("achievement evaluation after module completion");
        }
    }

    let completed_modules = get_completed_module_ids(db, user.id).await?;
    let unlocked_achievements = get_unlocked_achievement_ids(db, user.id).await?;
    let updated = get_user(db, user.id).await?;

    Ok(Json(CompleteModuleResponse {
        message: "Module marked as complete.".to_string(),
        completed_modules,
        unlocked_achievements,
        points: updated.points,
    }))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
