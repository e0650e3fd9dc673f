#[cfg(test)]
mod tests {
    use crate::catalog_db::{
        BucketCatalogDB, ListOptions, OrderByName, Patch, SearchOptions, UpdateFields,
        CATALOG_DB_FILE, DEFAULT_MAX_DESCRIPTION_SIZE, DEFAULT_MAX_METADATA_JSON_SIZE,
    };
    use mos_lib::{BucketName, EntityId, FilePath, MosError};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    fn create_sized_catalog(max_desc: usize, max_meta: usize) -> (BucketCatalogDB, TempDir) {
        let tmp = TempDir::new().unwrap();
        let catalog = BucketCatalogDB::new(
            BucketName::parse("test").unwrap(),
            tmp.path().join(CATALOG_DB_FILE),
            max_desc,
            max_meta,
            None,
        );
        catalog.connect().unwrap();
        (catalog, tmp)
    }

    fn create_test_catalog() -> (BucketCatalogDB, TempDir) {
        create_sized_catalog(DEFAULT_MAX_DESCRIPTION_SIZE, DEFAULT_MAX_METADATA_JSON_SIZE)
    }

    fn fp(path: &str) -> FilePath {
        FilePath::parse(path).unwrap()
    }

    fn create_file(catalog: &BucketCatalogDB, path: &str) -> EntityId {
        let entity = EntityId::new();
        catalog
            .create(&fp(path), &entity, EMPTY_MD5, None, 0, None, None)
            .unwrap();
        entity
    }

    fn create_described(catalog: &BucketCatalogDB, path: &str, description: &str) -> EntityId {
        let entity = EntityId::new();
        catalog
            .create(
                &fp(path),
                &entity,
                EMPTY_MD5,
                None,
                0,
                Some(description),
                None,
            )
            .unwrap();
        entity
    }

    // ==================== Create / Read ====================

    #[test]
    fn test_create_and_read() {
        let (catalog, _tmp) = create_test_catalog();
        let entity = EntityId::new();
        catalog
            .create(
                &fp("a/b/file.txt"),
                &entity,
                "0123456789abcdef0123456789abcdef",
                None,
                9,
                None,
                None,
            )
            .unwrap();

        let info = catalog.read(&fp("a/b/file.txt")).unwrap();
        assert_eq!(info.entity_id, entity);
        assert_eq!(info.checksum, "0123456789abcdef0123456789abcdef");
        assert_eq!(info.mime_type, "text/plain");
        assert_eq!(info.file_size, 9);
        assert!(info.last_modified > 0);
    }

    #[test]
    fn test_create_duplicate_path_fails() {
        let (catalog, _tmp) = create_test_catalog();
        create_file(&catalog, "file.txt");

        let entity = EntityId::new();
        let err = catalog
            .create(&fp("file.txt"), &entity, EMPTY_MD5, None, 0, None, None)
            .unwrap_err();
        assert!(err.is_already_exists());
        assert!(err.to_string().contains("test:file.txt"));
    }

    #[test]
    fn test_create_duplicate_entity_is_db_error() {
        let (catalog, _tmp) = create_test_catalog();
        let entity = create_file(&catalog, "one.txt");

        let err = catalog
            .create(&fp("two.txt"), &entity, EMPTY_MD5, None, 0, None, None)
            .unwrap_err();
        assert!(matches!(err, MosError::DbError(_)));
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let (catalog, _tmp) = create_test_catalog();
        let err = catalog.read(&fp("missing.txt")).unwrap_err();
        assert!(err.is_not_found());
        assert!(catalog.read_entity_id(&fp("missing.txt")).unwrap_err().is_not_found());
        assert!(catalog.read_description(&fp("missing.txt")).unwrap_err().is_not_found());
        assert!(catalog.read_metadata(&fp("missing.txt")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_read_projections() {
        let (catalog, _tmp) = create_test_catalog();
        let entity = EntityId::new();
        let meta = json!({"tags": ["a", "b"], "rank": 3});
        catalog
            .create(
                &fp("doc.md"),
                &entity,
                EMPTY_MD5,
                None,
                0,
                Some("release notes"),
                Some(&meta),
            )
            .unwrap();

        assert_eq!(catalog.read_entity_id(&fp("doc.md")).unwrap(), entity);
        assert_eq!(
            catalog.read_description(&fp("doc.md")).unwrap(),
            Some("release notes".to_string())
        );
        assert_eq!(catalog.read_metadata(&fp("doc.md")).unwrap(), Some(meta));

        create_file(&catalog, "bare.txt");
        assert_eq!(catalog.read_description(&fp("bare.txt")).unwrap(), None);
        assert_eq!(catalog.read_metadata(&fp("bare.txt")).unwrap(), None);
    }

    #[test]
    fn test_mime_defaults_from_basename() {
        let (catalog, _tmp) = create_test_catalog();
        create_file(&catalog, "img/photo.png");
        assert_eq!(catalog.read(&fp("img/photo.png")).unwrap().mime_type, "image/png");

        let entity = EntityId::new();
        catalog
            .create(
                &fp("custom.bin"),
                &entity,
                EMPTY_MD5,
                Some("application/x-custom".to_string()),
                0,
                None,
                None,
            )
            .unwrap();
        assert_eq!(
            catalog.read(&fp("custom.bin")).unwrap().mime_type,
            "application/x-custom"
        );
    }

    // ==================== Move / Copy ====================

    #[test]
    fn test_move_keeps_entity() {
        let (catalog, _tmp) = create_test_catalog();
        let entity = create_file(&catalog, "src.txt");

        catalog.move_file(&fp("src.txt"), &fp("dir/dst.txt")).unwrap();
        assert!(!catalog.exists_file(&fp("src.txt")).unwrap());
        assert_eq!(catalog.read_entity_id(&fp("dir/dst.txt")).unwrap(), entity);
    }

    #[test]
    fn test_move_missing_src_is_not_found() {
        let (catalog, _tmp) = create_test_catalog();
        let err = catalog.move_file(&fp("nope"), &fp("dst")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_move_onto_existing_dst_is_already_exists() {
        let (catalog, _tmp) = create_test_catalog();
        create_file(&catalog, "a.txt");
        create_file(&catalog, "b.txt");
        let err = catalog.move_file(&fp("a.txt"), &fp("b.txt")).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_copy_clones_side_metadata() {
        let (catalog, _tmp) = create_test_catalog();
        let src_entity = EntityId::new();
        let meta = json!({"origin": "copy-test"});
        catalog
            .create(
                &fp("orig.txt"),
                &src_entity,
                "11112222333344445555666677778888",
                None,
                42,
                Some("the original"),
                Some(&meta),
            )
            .unwrap();

        let dst_entity = EntityId::new();
        catalog
            .copy_file(&fp("orig.txt"), &fp("copied.txt"), &dst_entity)
            .unwrap();

        let src = catalog.read(&fp("orig.txt")).unwrap();
        let dst = catalog.read(&fp("copied.txt")).unwrap();
        assert_ne!(src.entity_id, dst.entity_id);
        assert_eq!(dst.entity_id, dst_entity);
        assert_eq!(dst.checksum, src.checksum);
        assert_eq!(dst.file_size, src.file_size);
        assert_eq!(dst.mime_type, src.mime_type);
        assert_eq!(
            catalog.read_description(&fp("copied.txt")).unwrap(),
            Some("the original".to_string())
        );
        assert_eq!(catalog.read_metadata(&fp("copied.txt")).unwrap(), Some(meta));
    }

    #[test]
    fn test_copy_error_mapping() {
        let (catalog, _tmp) = create_test_catalog();
        create_file(&catalog, "present.txt");

        let err = catalog
            .copy_file(&fp("absent.txt"), &fp("x.txt"), &EntityId::new())
            .unwrap_err();
        assert!(err.is_not_found());

        create_file(&catalog, "taken.txt");
        let err = catalog
            .copy_file(&fp("present.txt"), &fp("taken.txt"), &EntityId::new())
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    // ==================== Update ====================

    #[test]
    fn test_empty_update_only_verifies_existence() {
        let (catalog, _tmp) = create_test_catalog();
        let err = catalog
            .update(&fp("missing.txt"), &UpdateFields::default())
            .unwrap_err();
        assert!(err.is_not_found());

        create_file(&catalog, "here.txt");
        let before = catalog.read(&fp("here.txt")).unwrap();
        catalog.update(&fp("here.txt"), &UpdateFields::default()).unwrap();
        let after = catalog.read(&fp("here.txt")).unwrap();
        assert_eq!(before.last_modified, after.last_modified);
    }

    #[test]
    fn test_partial_update_touches_only_given_fields() {
        let (catalog, _tmp) = create_test_catalog();
        let entity = create_file(&catalog, "f.txt");

        let fields = UpdateFields {
            mime_type: Some("application/json".to_string()),
            ..Default::default()
        };
        catalog.update(&fp("f.txt"), &fields).unwrap();

        let info = catalog.read(&fp("f.txt")).unwrap();
        assert_eq!(info.mime_type, "application/json");
        assert_eq!(info.entity_id, entity);
        assert_eq!(info.checksum, EMPTY_MD5);
    }

    #[test]
    fn test_update_clears_description_and_metadata() {
        let (catalog, _tmp) = create_test_catalog();
        let entity = EntityId::new();
        let meta = json!({"k": 1});
        catalog
            .create(&fp("f.txt"), &entity, EMPTY_MD5, None, 0, Some("findable"), Some(&meta))
            .unwrap();

        let fields = UpdateFields {
            description: Patch::Clear,
            metadata: Patch::Clear,
            ..Default::default()
        };
        catalog.update(&fp("f.txt"), &fields).unwrap();

        assert_eq!(catalog.read_description(&fp("f.txt")).unwrap(), None);
        assert_eq!(catalog.read_metadata(&fp("f.txt")).unwrap(), None);
        // The cleared description must also leave the search corpus.
        let hits = catalog
            .search(&[], "findable", &SearchOptions::default())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_update_optimistic_guard() {
        let (catalog, _tmp) = create_test_catalog();
        let old_entity = create_file(&catalog, "f.txt");
        let new_entity = EntityId::new();

        // A stale guard matches zero rows.
        let stale = UpdateFields {
            new_entity_id: Some(new_entity.clone()),
            old_entity_id: Some(EntityId::new()),
            ..Default::default()
        };
        let err = catalog.update(&fp("f.txt"), &stale).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(catalog.read_entity_id(&fp("f.txt")).unwrap(), old_entity);

        let fresh = UpdateFields {
            new_entity_id: Some(new_entity.clone()),
            old_entity_id: Some(old_entity),
            checksum: Some("ffffffffffffffffffffffffffffffff".to_string()),
            file_size: Some(7),
            ..Default::default()
        };
        catalog.update(&fp("f.txt"), &fresh).unwrap();
        let info = catalog.read(&fp("f.txt")).unwrap();
        assert_eq!(info.entity_id, new_entity);
        assert_eq!(info.file_size, 7);
    }

    // ==================== Delete / Exists / Stat ====================

    #[test]
    fn test_delete_twice_is_not_found() {
        let (catalog, _tmp) = create_test_catalog();
        create_file(&catalog, "f.txt");
        catalog.delete(&fp("f.txt")).unwrap();
        assert!(!catalog.exists_file(&fp("f.txt")).unwrap());
        let err = catalog.delete(&fp("f.txt")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_exists_dir() {
        let (catalog, _tmp) = create_test_catalog();
        assert!(catalog.exists_dir(&[]).unwrap());

        create_file(&catalog, "a/b/c.txt");
        assert!(catalog.exists_dir(&["a".to_string()]).unwrap());
        assert!(catalog.exists_dir(&["a".to_string(), "b".to_string()]).unwrap());
        assert!(!catalog.exists_dir(&["z".to_string()]).unwrap());
        // The file itself is not a directory.
        assert!(!catalog
            .exists_dir(&["a".to_string(), "b".to_string(), "c.txt".to_string()])
            .unwrap());
    }

    #[test]
    fn test_stat_file_and_directory() {
        let (catalog, _tmp) = create_test_catalog();
        create_file(&catalog, "file1.txt");
        create_file(&catalog, "a/file1.txt");

        let s = catalog.stat(&fp("file1.txt")).unwrap();
        assert!(s.is_file);
        assert!(!s.is_directory);

        let s = catalog.stat(&fp("a")).unwrap();
        assert!(!s.is_file);
        assert!(s.is_directory);

        // The same string can be both a file and a directory prefix.
        create_file(&catalog, "a");
        let s = catalog.stat(&fp("a")).unwrap();
        assert!(s.is_file);
        assert!(s.is_directory);
    }

    // ==================== List ====================

    fn seed_tree(catalog: &BucketCatalogDB) {
        create_file(catalog, "file1.txt");
        create_file(catalog, "a/file1.txt");
        create_file(catalog, "a/b/file1.txt");
        create_file(catalog, "b/c/d/file1.txt");
    }

    #[test]
    fn test_list_root_orders_directories_first() {
        let (catalog, _tmp) = create_test_catalog();
        seed_tree(&catalog);

        let entries = catalog.list(&[], &ListOptions::default()).unwrap();
        let got: Vec<(String, bool)> = entries
            .into_iter()
            .map(|e| (e.name, e.is_file))
            .collect();
        assert_eq!(
            got,
            vec![
                ("a".to_string(), false),
                ("b".to_string(), false),
                ("file1.txt".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_list_subdirectory() {
        let (catalog, _tmp) = create_test_catalog();
        seed_tree(&catalog);

        let entries = catalog
            .list(&["a".to_string()], &ListOptions::default())
            .unwrap();
        let got: Vec<(String, bool)> = entries
            .into_iter()
            .map(|e| (e.name, e.is_file))
            .collect();
        assert_eq!(
            got,
            vec![("b".to_string(), false), ("file1.txt".to_string(), true)]
        );
    }

    #[test]
    fn test_list_limit_offset_and_order() {
        let (catalog, _tmp) = create_test_catalog();
        seed_tree(&catalog);

        let empty = catalog
            .list(
                &[],
                &ListOptions {
                    limit: Some(0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(empty.is_empty());

        let beyond = catalog
            .list(
                &[],
                &ListOptions {
                    offset: 10,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(beyond.is_empty());

        let first_two = catalog
            .list(
                &[],
                &ListOptions {
                    limit: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        let names: Vec<String> = first_two.into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        let desc = catalog
            .list(
                &[],
                &ListOptions {
                    order_by_name: OrderByName::Desc,
                    ..Default::default()
                },
            )
            .unwrap();
        let names: Vec<String> = desc.into_iter().map(|e| e.name).collect();
        assert_eq!(
            names,
            vec!["b".to_string(), "a".to_string(), "file1.txt".to_string()]
        );
    }

    // ==================== Search ====================

    #[test]
    fn test_search_orders_by_descending_score() {
        let (catalog, _tmp) = create_test_catalog();
        create_described(&catalog, "path/to/one.txt", "foo");
        create_described(&catalog, "path/to/two.txt", "foo foo foo bar baz");
        create_described(&catalog, "path/to/three.txt", "foo foo bar bar");

        let dir = vec!["path".to_string(), "to".to_string()];
        let hits = catalog.search(&dir, "foo", &SearchOptions::default()).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].file_path.fullpath(), "path/to/one.txt");
        assert!(hits[0].search_score > hits[1].search_score);
        assert!(hits[1].search_score > hits[2].search_score);
        assert_eq!(hits[0].description, Some("foo".to_string()));
    }

    #[test]
    fn test_search_depth_and_recursion() {
        let (catalog, _tmp) = create_test_catalog();
        create_described(&catalog, "path/to/shallow.txt", "needle");
        create_described(&catalog, "path/to/sub/deep.txt", "needle");
        create_described(&catalog, "elsewhere/stray.txt", "needle");

        let dir = vec!["path".to_string(), "to".to_string()];
        let flat = catalog.search(&dir, "needle", &SearchOptions::default()).unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].file_path.fullpath(), "path/to/shallow.txt");

        let deep = catalog
            .search(
                &dir,
                "needle",
                &SearchOptions {
                    recursive: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let paths: Vec<&str> = deep.iter().map(|h| h.file_path.fullpath()).collect();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&"path/to/shallow.txt"));
        assert!(paths.contains(&"path/to/sub/deep.txt"));
    }

    #[test]
    fn test_search_threshold_and_limit() {
        let (catalog, _tmp) = create_test_catalog();
        create_described(&catalog, "a.txt", "foo");
        create_described(&catalog, "b.txt", "foo foo other words here");

        let all = catalog.search(&[], "foo", &SearchOptions::default()).unwrap();
        assert_eq!(all.len(), 2);

        let top = catalog
            .search(
                &[],
                "foo",
                &SearchOptions {
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].file_path.fullpath(), "a.txt");

        let none = catalog
            .search(
                &[],
                "foo",
                &SearchOptions {
                    score_threshold: f64::MAX,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(none.is_empty());

        let miss = catalog.search(&[], "absent", &SearchOptions::default()).unwrap();
        assert!(miss.is_empty());
    }

    #[test]
    fn test_search_applies_fts_transform() {
        let tmp = TempDir::new().unwrap();
        let catalog = BucketCatalogDB::new(
            BucketName::parse("test").unwrap(),
            tmp.path().join(CATALOG_DB_FILE),
            DEFAULT_MAX_DESCRIPTION_SIZE,
            DEFAULT_MAX_METADATA_JSON_SIZE,
            Some(Arc::new(|s: &str| s.to_lowercase())),
        );
        catalog.connect().unwrap();

        create_described(&catalog, "f.txt", "MixedCase Token");
        let hits = catalog.search(&[], "MIXEDCASE", &SearchOptions::default()).unwrap();
        assert_eq!(hits.len(), 1);
        // The raw description is preserved; only the index is transformed.
        assert_eq!(hits[0].description, Some("MixedCase Token".to_string()));
    }

    // ==================== Validation bounds ====================

    #[test]
    fn test_description_size_limits() {
        let (catalog, _tmp) = create_sized_catalog(16, DEFAULT_MAX_METADATA_JSON_SIZE);

        let err = catalog
            .create(
                &fp("big.txt"),
                &EntityId::new(),
                EMPTY_MD5,
                None,
                0,
                Some("foobarfoobarfoobar"),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, MosError::InvalidParam(_)));

        catalog
            .create(
                &fp("ok.txt"),
                &EntityId::new(),
                EMPTY_MD5,
                None,
                0,
                Some("fooobaar"),
                None,
            )
            .unwrap();

        // One char over the two-bytes-per-char budget.
        let err = catalog
            .update(
                &fp("ok.txt"),
                &UpdateFields {
                    description: Patch::Set("fooobaarx".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, MosError::InvalidParam(_)));
    }

    #[test]
    fn test_metadata_size_limits() {
        let at_limit = json!({"k": "x"});
        let limit = serde_json::to_string(&at_limit).unwrap().len();
        let (catalog, _tmp) = create_sized_catalog(DEFAULT_MAX_DESCRIPTION_SIZE, limit);

        catalog
            .create(&fp("ok.json"), &EntityId::new(), EMPTY_MD5, None, 0, None, Some(&at_limit))
            .unwrap();

        let over = json!({"k": "xx"});
        let err = catalog
            .create(&fp("big.json"), &EntityId::new(), EMPTY_MD5, None, 0, None, Some(&over))
            .unwrap_err();
        assert!(matches!(err, MosError::InvalidParam(_)));
    }

    // ==================== Connection lifecycle ====================

    #[test]
    fn test_operations_require_connection() {
        let tmp = TempDir::new().unwrap();
        let catalog = BucketCatalogDB::new(
            BucketName::parse("test").unwrap(),
            tmp.path().join(CATALOG_DB_FILE),
            DEFAULT_MAX_DESCRIPTION_SIZE,
            DEFAULT_MAX_METADATA_JSON_SIZE,
            None,
        );
        let err = catalog.read(&fp("f.txt")).unwrap_err();
        assert!(matches!(err, MosError::InvalidState(_)));
    }

    #[test]
    fn test_connect_is_idempotent() {
        let (catalog, _tmp) = create_test_catalog();
        catalog.connect().unwrap();
        assert!(catalog.is_connected());
        catalog.disconnect().unwrap();
        catalog.disconnect().unwrap();
        assert!(!catalog.is_connected());
    }

    #[test]
    fn test_disconnect_reconnect_preserves_rows() {
        let (catalog, _tmp) = create_test_catalog();
        let entity = create_file(&catalog, "keep/me.txt");
        let meta = json!({"sticky": true});
        catalog
            .update(
                &fp("keep/me.txt"),
                &UpdateFields {
                    metadata: Patch::Set(meta.clone()),
                    ..Default::default()
                },
            )
            .unwrap();

        catalog.disconnect().unwrap();
        catalog.connect().unwrap();

        assert_eq!(catalog.read_entity_id(&fp("keep/me.txt")).unwrap(), entity);
        assert_eq!(catalog.read_metadata(&fp("keep/me.txt")).unwrap(), Some(meta));
    }
}
