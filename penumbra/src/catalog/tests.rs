use super::*;

fn sky_row(id: u64, ra: f64, dec: f64) -> Source {
    Source {
        id,
        ra: Some(ra),
        dec: Some(dec),
        ..Source::default()
    }
}

fn sized_row(id: u64, r_circ: f64, flux: f64) -> Source {
    Source {
        id,
        r_circ,
        flux,
        ..Source::default()
    }
}

fn ids(catalog: &Catalog) -> Vec<u64> {
    catalog.iter().map(|s| s.id).collect()
}

// ============================================================================
// Columns
// ============================================================================

#[test]
fn test_column_lookup() {
    let mut catalog = Catalog::from_sources(vec![sized_row(1, 2.0, 3.0)]);
    catalog.add_extra_column("mu_3", &[24.5]).unwrap();

    assert_eq!(catalog.column("r_circ").unwrap(), Column::Builtin(Field::RCirc));
    assert_eq!(catalog.column("x_peak").unwrap(), Column::Builtin(Field::XPeak));
    assert_eq!(catalog.column("mu_3").unwrap(), Column::Extra(0));
    assert_eq!(catalog.value(0, Column::Extra(0)), 24.5);
    assert!(matches!(
        catalog.column("mag_ell"),
        Err(Error::UnknownField(ref name)) if name == "mag_ell"
    ));
}

#[test]
fn test_missing_sky_reads_as_nan() {
    let catalog = Catalog::from_sources(vec![Source::default()]);
    assert!(catalog.value(0, Column::Builtin(Field::Ra)).is_nan());
    assert!(catalog.value(0, Column::Builtin(Field::Tract)).is_nan());
}

#[test]
fn test_extra_column_length_checked() {
    let mut catalog = Catalog::from_sources(vec![Source::default(), Source::default()]);
    assert!(catalog.add_extra_column("q", &[1.0]).is_err());
    assert!(catalog.add_extra_column("flux", &[1.0, 2.0]).is_err(), "shadows a built-in");
}

#[test]
fn test_concat_keeps_order_and_checks_schema() {
    let a = Catalog::from_sources(vec![sized_row(1, 0.0, 0.0), sized_row(2, 0.0, 0.0)]);
    let b = Catalog::from_sources(vec![sized_row(3, 0.0, 0.0)]);
    let merged = Catalog::concat([&a, &b]).unwrap();
    assert_eq!(ids(&merged), vec![1, 2, 3]);

    let mut c = b.clone();
    c.add_extra_column("mu", &[1.0]).unwrap();
    let err = Catalog::concat([&a, &c]).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { .. }));

    assert!(Catalog::concat(std::iter::empty::<&Catalog>()).unwrap().is_empty());
}

#[test]
fn test_set_provenance() {
    let mut catalog = Catalog::from_sources(vec![Source::default()]);
    catalog.set_provenance(Some(9617), Some("7,3"), Some(Pass::Cold));
    let row = &catalog.sources[0];
    assert_eq!(row.tract, Some(9617));
    assert_eq!(row.patch.as_deref(), Some("7,3"));
    assert_eq!(row.pass, Some(Pass::Cold));
}

// ============================================================================
// Deduplication
// ============================================================================

#[test]
fn test_dedup_well_separated_rows_untouched() {
    let catalog = Catalog::from_sources(vec![
        sky_row(1, 150.0, 2.0),
        sky_row(2, 150.001, 2.0),
        sky_row(3, 150.0, 2.001),
    ]);
    let result = deduplicate(&catalog, &DedupConfig::default()).unwrap();
    assert_eq!(result.catalog, catalog);
    assert_eq!(result.removed, 0);
}

#[test]
fn test_dedup_identical_positions_keep_first() {
    let catalog = Catalog::from_sources(vec![sky_row(7, 150.0, 2.0), sky_row(3, 150.0, 2.0)]);
    let result = deduplicate(&catalog, &DedupConfig::default()).unwrap();
    assert_eq!(ids(&result.catalog), vec![7]);
    assert_eq!(result.kept, vec![true, false]);
}

#[test]
fn test_dedup_is_order_dependent_first_wins() {
    // 0.5" apart: B duplicates both A and C, but A and C are 1" apart.
    let step = 0.5 / 3600.0;
    let a = sky_row(1, 150.0, 2.0);
    let b = sky_row(2, 150.0, 2.0 + step);
    let c = sky_row(3, 150.0, 2.0 + 2.0 * step);

    let forward = Catalog::from_sources(vec![a.clone(), b.clone(), c.clone()]);
    let result = deduplicate(&forward, &DedupConfig::default()).unwrap();
    assert_eq!(ids(&result.catalog), vec![1, 3]);

    let middle_first = Catalog::from_sources(vec![b, a, c]);
    let result = deduplicate(&middle_first, &DedupConfig::default()).unwrap();
    assert_eq!(ids(&result.catalog), vec![2]);
}

#[test]
fn test_dedup_pixel_space() {
    let at = |id, x, y| Source {
        id,
        x,
        y,
        ..Source::default()
    };
    let catalog = Catalog::from_sources(vec![at(1, 10.0, 10.0), at(2, 11.0, 10.0), at(3, 13.0, 10.0)]);
    let config = DedupConfig {
        min_separation: 2.0,
        space: MatchSpace::Pixel,
    };
    let result = deduplicate(&catalog, &config).unwrap();
    assert_eq!(ids(&result.catalog), vec![1, 3], "separation == 2 is not a duplicate");
}

#[test]
fn test_dedup_requires_sky_positions() {
    let catalog = Catalog::from_sources(vec![sky_row(1, 1.0, 1.0), Source::default()]);
    let err = deduplicate(&catalog, &DedupConfig::default()).unwrap_err();
    assert!(matches!(err, Error::MissingSkyPosition { row: 1 }));
}

// ============================================================================
// Selection
// ============================================================================

#[test]
fn test_selection_without_active_rules_is_identity() {
    let catalog = Catalog::from_sources(vec![sized_row(1, 0.5, 1.0), sized_row(2, 3.0, 9.0)]);
    let rules = vec![
        SelectionRule {
            field: "r_circ".into(),
            bound: Bound::Min,
            threshold: None,
        },
        SelectionRule {
            field: "not_a_column".into(),
            bound: Bound::Max,
            threshold: None,
        },
    ];
    let selection = apply_selection(&catalog, &rules).unwrap();
    assert_eq!(selection.catalog, catalog);
    assert_eq!((selection.before, selection.after), (2, 2));
}

#[test]
fn test_selection_bounds_are_strict() {
    let catalog = Catalog::from_sources(vec![
        sized_row(1, 1.5, 5.0),
        sized_row(2, 2.0, 5.0),
        sized_row(3, 2.0, 10.0),
    ]);
    let rules = [SelectionRule::min("r_circ", 1.5), SelectionRule::max("flux", 10.0)];
    let selection = apply_selection(&catalog, &rules).unwrap();
    assert_eq!(ids(&selection.catalog), vec![2]);
    assert_eq!(selection.mask, vec![false, true, false]);
    assert_eq!((selection.before, selection.after), (3, 1));
}

#[test]
fn test_selection_nan_fails_every_bound() {
    let catalog = Catalog::from_sources(vec![Source::default()]);
    let min = apply_selection(&catalog, &[SelectionRule::min("ra", -1000.0)]).unwrap();
    let max = apply_selection(&catalog, &[SelectionRule::max("ra", 1000.0)]).unwrap();
    assert_eq!(min.after, 0);
    assert_eq!(max.after, 0);
}

#[test]
fn test_selection_unknown_field() {
    let catalog = Catalog::from_sources(vec![Source::default()]);
    let err = apply_selection(&catalog, &[SelectionRule::max("mag_ell", 24.0)]).unwrap_err();
    assert!(matches!(err, Error::UnknownField(_)));
}

// ============================================================================
// CSV
// ============================================================================

#[test]
fn test_csv_preserves_rows_and_extra_columns() {
    let mut catalog = Catalog::from_sources(vec![
        Source {
            id: 4,
            x: 12.25,
            y: 30.5,
            npix: 41.7,
            a: 3.5,
            ra: Some(150.25),
            dec: Some(-2.5),
            tract: Some(9617),
            patch: Some("4,5".into()),
            pass: Some(Pass::Hot),
            ..Source::default()
        },
        Source {
            id: 5,
            ..Source::default()
        },
    ]);
    catalog.add_extra_column("mu_3", &[23.5, f64::NAN]).unwrap();

    let mut buffer = Vec::new();
    catalog.write_csv(&mut buffer).unwrap();
    let text = String::from_utf8(buffer.clone()).unwrap();
    assert!(text.starts_with("id,x,y,x_peak,y_peak,peak,flux,npix,a,b,theta,r_circ,ra,dec,tract,patch,pass,mu_3"));

    let back = Catalog::read_csv(buffer.as_slice()).unwrap();
    assert_eq!(back.extra_columns, vec!["mu_3".to_string()]);
    assert_eq!(back.sources[0].x, 12.25);
    assert_eq!(back.sources[0].ra, Some(150.25));
    assert_eq!(back.sources[0].tract, Some(9617));
    assert_eq!(back.sources[0].pass, Some(Pass::Hot));
    assert_eq!(back.sources[0].extra, vec![23.5]);
    assert_eq!(back.sources[1].ra, None);
    assert_eq!(back.sources[1].patch, None);
    assert!(back.sources[1].extra[0].is_nan());
}

#[test]
fn test_csv_malformed_value() {
    let text = "id,x\n1,abc\n";
    let err = Catalog::read_csv(text.as_bytes()).unwrap_err();
    assert!(
        matches!(err, Error::MalformedValue { row: 0, ref column, .. } if column == "x"),
        "unexpected {err:?}"
    );
}

#[test]
fn test_csv_missing_file_is_io_error() {
    let path = std::env::temp_dir().join("penumbra_no_such_catalog.csv");
    let err = Catalog::read_csv_path(&path).unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err:?}");
}
