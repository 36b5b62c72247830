//! Shared database catalog.

use sqlx::Postgres;

use crate::migrations::Migration;

const CREATE_WORKSPACES: &str = include_str!("../../migrations/shared/0001_create_workspaces.sql");
const CREATE_PROJECTS: &str = include_str!("../../migrations/shared/0002_create_projects.sql");
const CREATE_NOTES: &str = include_str!("../../migrations/shared/0003_create_notes.sql");
const CREATE_TAGS: &str = include_str!("../../migrations/shared/0004_create_tags.sql");
const ADD_NOTES_UPDATED_BY: &str =
    include_str!("../../migrations/shared/0005_add_notes_updated_by.sql");
const BACKFILL_NOTES_UPDATED_BY: &str =
    include_str!("../../migrations/shared/0006_backfill_notes_updated_by.sql");
const ADD_MEMBER_ROLE: &str = include_str!("../../migrations/shared/0007_add_member_role.sql");
const DROP_MEMBER_IS_OWNER: &str =
    include_str!("../../migrations/shared/0008_drop_member_is_owner.sql");
const CREATE_NOTE_TEMPLATES: &str =
    include_str!("../../migrations/shared/0009_create_note_templates.sql");

/// All shared database migrations.
pub fn migrations() -> Vec<Migration<Postgres>> {
    vec![
        Migration::sql(1, "create_workspaces", CREATE_WORKSPACES)
            .reverse_sql("DROP TABLE workspace_members; DROP TABLE workspaces;"),
        Migration::sql(2, "create_projects", CREATE_PROJECTS).reverse_sql("DROP TABLE projects"),
        Migration::sql(3, "create_notes", CREATE_NOTES).reverse_sql("DROP TABLE notes"),
        Migration::sql(4, "create_tags", CREATE_TAGS)
            .reverse_sql("DROP TABLE note_tags; DROP TABLE tags;"),
        Migration::sql(5, "add_notes_updated_by", ADD_NOTES_UPDATED_BY)
            .reverse_sql("ALTER TABLE notes DROP COLUMN updated_by"),
        Migration::sql(6, "backfill_notes_updated_by", BACKFILL_NOTES_UPDATED_BY),
        Migration::sql(7, "add_member_role", ADD_MEMBER_ROLE).reverse_sql(
            "ALTER TABLE workspace_members DROP CONSTRAINT workspace_members_role_check;
             ALTER TABLE workspace_members DROP COLUMN role;",
        ),
        Migration::sql(8, "drop_member_is_owner", DROP_MEMBER_IS_OWNER).reverse_sql(
            "ALTER TABLE workspace_members ADD COLUMN is_owner BOOLEAN NOT NULL DEFAULT FALSE;
             UPDATE workspace_members SET is_owner = (role = 'owner');",
        ),
        Migration::sql(9, "create_note_templates", CREATE_NOTE_TEMPLATES).reverse_sql(
            "DROP TRIGGER note_templates_touch_updated_at ON note_templates;
             DROP FUNCTION quire_touch_updated_at();
             DROP TABLE note_templates;",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_function_is_one_statement() {
        let templates = migrations()
            .into_iter()
            .find(|unit| unit.sequence() == 9)
            .unwrap();
        let statements = templates.forward().statements();

        assert_eq!(statements.len(), 3);
        assert!(statements[1].starts_with("CREATE FUNCTION quire_touch_updated_at()"));
        assert!(statements[1].contains("NEW.updated_at := NOW();"));
        assert!(statements[2].starts_with("CREATE TRIGGER"));
    }

    #[test]
    fn test_role_migration_backfills_owners() {
        let role = migrations()
            .into_iter()
            .find(|unit| unit.identifier() == "0007_add_member_role")
            .unwrap();
        let statements = role.forward().statements();

        assert_eq!(statements.len(), 3);
        assert_eq!(
            statements[1],
            "UPDATE workspace_members SET role = 'owner' WHERE is_owner"
        );
        assert!(role.is_reversible());
    }

    #[test]
    fn test_backfill_is_one_way() {
        let backfill = migrations()
            .into_iter()
            .find(|unit| unit.sequence() == 6)
            .unwrap();
        assert!(!backfill.is_reversible());
    }
}
